//! Attribute directory mirroring one device, one value per file.
//!
//! The server exports device state into the directory after every cycle.
//! Readers such as the CLI never talk to the device directly: a configuration
//! change is dropped next to the attribute as `<name>.request` and the server
//! claims and applies it on its next sync. Attribute files themselves are only
//! ever written by the export, so a pending request is never overwritten.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::common::calibration::CalibrationTriple;
use crate::common::compensation::RawTemperature;
use crate::common::device::{Bmp280, DeviceState};
use crate::common::i2c::I2CHandle;
use crate::common::log::recent_log_lines;
use crate::common::settings::{
    FilterCoefficient, InvalidConfiguration, Oversampling, PowerMode, StandbyTime,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    RawTemp,
    DigT1,
    DigT2,
    DigT3,
    Temp,
    Oversampling,
    FilterCoeff,
    StandbyTime,
    /// Configured mode. Between forced conversions the hardware mode bits read
    /// sleep whatever this holds.
    PowerMode,
    PollSeq,
    Status,
    Log,
}

impl Attribute {
    pub const ALL: [Attribute; 12] = [
        Attribute::RawTemp,
        Attribute::DigT1,
        Attribute::DigT2,
        Attribute::DigT3,
        Attribute::Temp,
        Attribute::Oversampling,
        Attribute::FilterCoeff,
        Attribute::StandbyTime,
        Attribute::PowerMode,
        Attribute::PollSeq,
        Attribute::Status,
        Attribute::Log,
    ];

    pub const WRITABLE: [Attribute; 4] = [
        Attribute::Oversampling,
        Attribute::FilterCoeff,
        Attribute::StandbyTime,
        Attribute::PowerMode,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Attribute::RawTemp => "raw_temp",
            Attribute::DigT1 => "dig_t1",
            Attribute::DigT2 => "dig_t2",
            Attribute::DigT3 => "dig_t3",
            Attribute::Temp => "temp",
            Attribute::Oversampling => "oversampling",
            Attribute::FilterCoeff => "filter_coeff",
            Attribute::StandbyTime => "standby_time",
            Attribute::PowerMode => "power_mode",
            Attribute::PollSeq => "poll_seq",
            Attribute::Status => "status",
            Attribute::Log => "log",
        }
    }

    pub fn writable(self) -> bool {
        Self::WRITABLE.contains(&self)
    }

    /// Validates `value` and returns the label stored in the file.
    pub fn canonical_value(self, value: &str) -> Result<String, SysfsError> {
        let label = match self {
            Attribute::Oversampling => value.parse::<Oversampling>()?.label(),
            Attribute::FilterCoeff => value.parse::<FilterCoefficient>()?.label(),
            Attribute::StandbyTime => value.parse::<StandbyTime>()?.label(),
            Attribute::PowerMode => match value.parse::<PowerMode>()? {
                PowerMode::Forced => {
                    return Err(InvalidConfiguration::new(PowerMode::FIELD, PowerMode::Forced).into())
                }
                mode => mode.label(),
            },
            _ => return Err(SysfsError::ReadOnly(self)),
        };
        Ok(label.to_string())
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.file_name(), f)
    }
}

impl FromStr for Attribute {
    type Err = SysfsError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|attribute| attribute.file_name() == s)
            .ok_or_else(|| SysfsError::UnknownAttribute(s.to_string()))
    }
}

#[derive(Error, Debug)]
pub enum SysfsError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("attribute {0} is read-only")]
    ReadOnly(Attribute),
    #[error("unknown attribute {0}")]
    UnknownAttribute(String),
    #[error("attribute {attribute} holds `{value}`")]
    Parse { attribute: Attribute, value: String },
    #[error("attribute {0} holds no value yet")]
    Empty(Attribute),
    #[error(transparent)]
    InvalidConfiguration(#[from] InvalidConfiguration),
}

impl SysfsError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn status_line(state: &DeviceState) -> String {
    match (&state.last_failure, state.raw_temperature) {
        (Some(failure), _) => format!("failed: {failure}"),
        (None, None) => "no-reading".to_string(),
        (None, Some(_)) => "ok".to_string(),
    }
}

#[derive(Clone, Debug)]
pub struct AttributeDir {
    root: PathBuf,
}

impl AttributeDir {
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, SysfsError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| SysfsError::io(&root, err))?;
        Ok(Self { root })
    }

    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SysfsError> {
        let root = root.into();
        let metadata = fs::metadata(&root).map_err(|err| SysfsError::io(&root, err))?;
        if !metadata.is_dir() {
            return Err(SysfsError::io(&root, io::Error::other("not a directory")));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, attribute: Attribute) -> PathBuf {
        self.root.join(attribute.file_name())
    }

    /// Pending configuration change for `attribute`, waiting for the server.
    pub fn request_path(&self, attribute: Attribute) -> PathBuf {
        self.root.join(format!("{}.request", attribute.file_name()))
    }

    fn claimed_path(&self, attribute: Attribute) -> PathBuf {
        self.root.join(format!(".{}.claimed", attribute.file_name()))
    }

    // readers only ever see a complete file
    fn write_atomic(staging: &Path, path: &Path, value: impl fmt::Display) -> Result<(), SysfsError> {
        fs::write(staging, format!("{value}\n")).map_err(|err| SysfsError::io(staging, err))?;
        fs::rename(staging, path).map_err(|err| SysfsError::io(path, err))
    }

    fn write_value(&self, attribute: Attribute, value: impl fmt::Display) -> Result<(), SysfsError> {
        let staging = self.root.join(format!(".{}.export.tmp", attribute.file_name()));
        Self::write_atomic(&staging, &self.path(attribute), value)
    }

    /// File content without its trailing newline.
    pub fn read_value(&self, attribute: Attribute) -> Result<String, SysfsError> {
        let path = self.path(attribute);
        let content = fs::read_to_string(&path).map_err(|err| SysfsError::io(&path, err))?;
        Ok(content.trim_end_matches('\n').to_string())
    }

    fn parse_value<T: FromStr>(&self, attribute: Attribute) -> Result<T, SysfsError> {
        let value = self.read_value(attribute)?;
        if value.is_empty() {
            return Err(SysfsError::Empty(attribute));
        }
        value
            .trim()
            .parse()
            .map_err(|_| SysfsError::Parse { attribute, value })
    }

    pub fn export<H: I2CHandle>(&self, device: &Bmp280<H>) -> Result<(), SysfsError> {
        self.export_state(&device.state())
    }

    pub fn export_state(&self, state: &DeviceState) -> Result<(), SysfsError> {
        let raw = state
            .raw_temperature
            .map(|raw| raw.to_string())
            .unwrap_or_default();
        let temp = state
            .temperature()
            .map(|temp| temp.centi_celsius().to_string())
            .unwrap_or_default();
        self.write_value(Attribute::RawTemp, raw)?;
        self.write_value(Attribute::Temp, temp)?;
        self.write_value(Attribute::DigT1, state.calibration.t1)?;
        self.write_value(Attribute::DigT2, state.calibration.t2)?;
        self.write_value(Attribute::DigT3, state.calibration.t3)?;
        self.write_value(Attribute::Oversampling, state.configuration.oversampling)?;
        self.write_value(Attribute::FilterCoeff, state.configuration.filter_coefficient)?;
        self.write_value(Attribute::StandbyTime, state.configuration.standby_time)?;
        self.write_value(Attribute::PowerMode, state.configuration.power_mode)?;
        self.write_value(Attribute::PollSeq, state.poll_sequence)?;
        self.write_value(Attribute::Status, status_line(state))?;
        self.write_value(Attribute::Log, recent_log_lines().join("\n"))
    }

    /// Applies pending configuration requests, then exports. Each request is
    /// claimed by renaming it before it is read, so a request written while
    /// the device is busy stays in place for the next sync. Rejected requests
    /// are logged and dropped. Returns how many settings were applied.
    pub fn sync<H: I2CHandle>(&self, device: &Bmp280<H>) -> Result<usize, SysfsError> {
        let mut applied = 0;
        for attribute in Attribute::WRITABLE {
            let Some(requested) = self.claim_request(attribute)? else {
                continue;
            };
            // applied even when it matches the recorded configuration
            let result = match attribute {
                Attribute::Oversampling => device.set_oversampling(requested.as_str()).map(|_| ()),
                Attribute::FilterCoeff => {
                    device.set_filter_coefficient(requested.as_str()).map(|_| ())
                }
                Attribute::StandbyTime => device.set_standby_time(requested.as_str()).map(|_| ()),
                _ => device.set_power_mode(requested.as_str()).map(|_| ()),
            };
            match result {
                Ok(()) => {
                    log::info!("{} set to {}", attribute, requested);
                    applied += 1;
                }
                Err(err) => log::warn!("rejected {} = {}: {}", attribute, requested, err),
            }
        }
        self.export(device)?;
        Ok(applied)
    }

    fn claim_request(&self, attribute: Attribute) -> Result<Option<String>, SysfsError> {
        let request = self.request_path(attribute);
        let claimed = self.claimed_path(attribute);
        match fs::rename(&request, &claimed) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(SysfsError::io(&request, err)),
        }
        let value = fs::read_to_string(&claimed).map_err(|err| SysfsError::io(&claimed, err))?;
        fs::remove_file(&claimed).map_err(|err| SysfsError::io(&claimed, err))?;
        Ok(Some(value.trim().to_string()))
    }

    /// Validates a configuration value and leaves it as a request for the
    /// server to apply.
    pub fn request_write(&self, attribute: Attribute, value: &str) -> Result<(), SysfsError> {
        let value = attribute.canonical_value(value)?;
        let staging = self.root.join(format!(
            ".{}.request.{}.tmp",
            attribute.file_name(),
            std::process::id()
        ));
        Self::write_atomic(&staging, &self.request_path(attribute), value)
    }

    /// The value requested for `attribute` that the server has not applied yet.
    pub fn pending_request(&self, attribute: Attribute) -> Result<Option<String>, SysfsError> {
        let path = self.request_path(attribute);
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value.trim().to_string())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SysfsError::io(&path, err)),
        }
    }

    pub fn read_calibration(&self) -> Result<CalibrationTriple, SysfsError> {
        Ok(CalibrationTriple {
            t1: self.parse_value(Attribute::DigT1)?,
            t2: self.parse_value(Attribute::DigT2)?,
            t3: self.parse_value(Attribute::DigT3)?,
        })
    }

    /// `None` until the device produced its first reading.
    pub fn read_raw_temperature(&self) -> Result<Option<RawTemperature>, SysfsError> {
        match self.parse_value::<u32>(Attribute::RawTemp) {
            Ok(raw) => Ok(Some(RawTemperature::new(raw))),
            Err(SysfsError::Empty(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Attribute, AttributeDir, SysfsError};
    use crate::common::calibration::CalibrationTriple;
    use crate::common::config::Bmp280Config;
    use crate::common::conversion::StatusPolling;
    use crate::common::device::Bmp280;
    use crate::common::i2c::{FakeBmp280, I2COp, RecordingI2CHandle};
    use crate::common::registers::Register;
    use crate::common::settings::{Oversampling, PowerMode, StandbyTime};

    fn fast_config() -> Bmp280Config {
        Bmp280Config {
            status_polling: StatusPolling {
                quantum: Duration::ZERO,
                max_polls: 5,
            },
            ..Default::default()
        }
    }

    fn device() -> Bmp280<FakeBmp280> {
        let config = fast_config();
        Bmp280::new(
            FakeBmp280::new("i2c0".to_string())
                .with_calibration([0x6F, 0x6E, 0x67, 0x93, 0x32, 0x00])
                .with_raw_temperature(0x7FB03),
            &config,
        )
        .unwrap()
    }

    #[test_log::test]
    fn test_attribute_names() {
        for attribute in Attribute::ALL {
            assert_eq!(attribute.file_name().parse::<Attribute>().unwrap(), attribute);
        }
        assert!("pressure".parse::<Attribute>().is_err());
        assert!(Attribute::PowerMode.writable());
        assert!(!Attribute::RawTemp.writable());
    }

    #[test_log::test]
    fn test_export_before_and_after_reading() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = AttributeDir::create(tmp.path().join("1-0076")).unwrap();
        let device = device();

        dir.export(&device).unwrap();
        assert_eq!(dir.read_value(Attribute::Status).unwrap(), "no-reading");
        assert_eq!(dir.read_raw_temperature().unwrap(), None);
        assert_eq!(dir.read_value(Attribute::DigT2).unwrap(), "-27801");

        device.convert().unwrap();
        dir.export(&device).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path(Attribute::RawTemp)).unwrap(),
            "523011\n"
        );
        assert_eq!(dir.read_value(Attribute::Temp).unwrap(), "-2342");
        assert_eq!(dir.read_value(Attribute::Status).unwrap(), "ok");
        assert_eq!(dir.read_value(Attribute::PollSeq).unwrap(), "1");
        assert_eq!(dir.read_value(Attribute::Oversampling).unwrap(), "x1");
        assert_eq!(dir.read_value(Attribute::FilterCoeff).unwrap(), "16");
        assert_eq!(dir.read_value(Attribute::StandbyTime).unwrap(), "500");
        assert_eq!(dir.read_value(Attribute::PowerMode).unwrap(), "normal");
        assert_eq!(
            dir.read_calibration().unwrap(),
            CalibrationTriple {
                t1: 28271,
                t2: -27801,
                t3: 50
            }
        );
    }

    #[test_log::test]
    fn test_request_write_validates() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = AttributeDir::create(tmp.path()).unwrap();
        dir.request_write(Attribute::Oversampling, " x8 ").unwrap();
        assert_eq!(
            dir.pending_request(Attribute::Oversampling).unwrap(),
            Some("x8".to_string())
        );
        assert!(matches!(
            dir.request_write(Attribute::Oversampling, "x7"),
            Err(SysfsError::InvalidConfiguration(_))
        ));
        assert!(dir.request_write(Attribute::PowerMode, "forced").is_err());
        assert!(matches!(
            dir.request_write(Attribute::RawTemp, "1"),
            Err(SysfsError::ReadOnly(Attribute::RawTemp))
        ));
        assert_eq!(
            dir.pending_request(Attribute::Oversampling).unwrap(),
            Some("x8".to_string())
        );
        assert_eq!(dir.pending_request(Attribute::PowerMode).unwrap(), None);
        // no staging files left behind
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test_log::test]
    fn test_sync_applies_requested_configuration() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = AttributeDir::create(tmp.path()).unwrap();
        let device = device();
        dir.export(&device).unwrap();

        dir.request_write(Attribute::Oversampling, "x16").unwrap();
        dir.request_write(Attribute::StandbyTime, "62.5").unwrap();
        dir.request_write(Attribute::PowerMode, "sleep").unwrap();
        // the attribute files keep showing the device until it applied them
        assert_eq!(dir.read_value(Attribute::Oversampling).unwrap(), "x1");
        assert_eq!(dir.sync(&device).unwrap(), 3);

        let configuration = device.configuration();
        assert_eq!(configuration.oversampling, Oversampling::X16);
        assert_eq!(configuration.standby_time, StandbyTime::Ms62_5);
        assert_eq!(configuration.power_mode, PowerMode::Sleep);
        assert_eq!(dir.read_value(Attribute::Oversampling).unwrap(), "x16");
        assert_eq!(dir.pending_request(Attribute::Oversampling).unwrap(), None);
        // nothing left to apply
        assert_eq!(dir.sync(&device).unwrap(), 0);
    }

    #[test_log::test]
    fn test_request_during_sync_is_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = AttributeDir::create(tmp.path()).unwrap();
        let device = device();
        dir.export(&device).unwrap();

        dir.request_write(Attribute::Oversampling, "x16").unwrap();
        let claimed = dir.claim_request(Attribute::Oversampling).unwrap();
        assert_eq!(claimed, Some("x16".to_string()));
        // a second request lands while the first one is being applied
        dir.request_write(Attribute::Oversampling, "x2").unwrap();
        device.set_oversampling("x16").unwrap();
        dir.export(&device).unwrap();

        assert_eq!(dir.read_value(Attribute::Oversampling).unwrap(), "x16");
        assert_eq!(
            dir.pending_request(Attribute::Oversampling).unwrap(),
            Some("x2".to_string())
        );
        assert_eq!(dir.sync(&device).unwrap(), 1);
        assert_eq!(device.configuration().oversampling, Oversampling::X2);
        assert_eq!(dir.read_value(Attribute::Oversampling).unwrap(), "x2");
    }

    #[test_log::test]
    fn test_power_mode_request_reaches_hardware_after_conversion() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = AttributeDir::create(tmp.path()).unwrap();
        let handle = RecordingI2CHandle::new(FakeBmp280::new("i2c0".to_string()));
        let ops = handle.ops();
        let device = Bmp280::new(handle, &fast_config()).unwrap();
        device.convert().unwrap();
        dir.export(&device).unwrap();
        assert_eq!(dir.read_value(Attribute::PowerMode).unwrap(), "normal");
        ops.lock().unwrap().clear();

        dir.request_write(Attribute::PowerMode, "normal").unwrap();
        assert_eq!(dir.sync(&device).unwrap(), 1);
        let ctrl_meas_writes: Vec<u8> = ops
            .lock()
            .unwrap()
            .iter()
            .filter_map(|op| match op {
                I2COp::Write(bytes) if bytes.len() == 2 && bytes[0] == Register::CtrlMeas.addr() => {
                    Some(bytes[1])
                }
                _ => None,
            })
            .collect();
        assert_eq!(ctrl_meas_writes.len(), 1);
        assert_eq!(ctrl_meas_writes[0] & 0x03, 0x03);
    }

    #[test_log::test]
    fn test_sync_drops_rejected_requests() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = AttributeDir::create(tmp.path()).unwrap();
        let device = device();
        dir.export(&device).unwrap();

        std::fs::write(dir.request_path(Attribute::FilterCoeff), "3\n").unwrap();
        assert_eq!(dir.sync(&device).unwrap(), 0);
        assert_eq!(dir.read_value(Attribute::FilterCoeff).unwrap(), "16");
        assert_eq!(dir.pending_request(Attribute::FilterCoeff).unwrap(), None);
    }

    #[test_log::test]
    fn test_open_missing_dir_fails() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            AttributeDir::open(tmp.path().join("missing")),
            Err(SysfsError::Io { .. })
        ));
        assert!(AttributeDir::open(tmp.path()).is_ok());
    }

    #[test_log::test]
    fn test_empty_calibration_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = AttributeDir::create(tmp.path()).unwrap();
        std::fs::write(dir.path(Attribute::DigT1), "\n").unwrap();
        assert!(matches!(
            dir.read_calibration(),
            Err(SysfsError::Empty(Attribute::DigT1))
        ));
        std::fs::write(dir.path(Attribute::DigT1), "abc\n").unwrap();
        assert!(matches!(
            dir.read_calibration(),
            Err(SysfsError::Parse {
                attribute: Attribute::DigT1,
                ..
            })
        ));
    }
}
