use super::i2c::I2CHandle;
use super::protocol::{BusError, RegisterProtocol};
use super::registers::{Register, CALIBRATION_LEN};

/// Factory temperature trimming coefficients (dig_T1..dig_T3).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CalibrationTriple {
    pub t1: u16,
    pub t2: i16,
    pub t3: i16,
}

impl CalibrationTriple {
    /// Burst reads the coefficients from `calib00`. Done once per device
    /// lifetime, after reset and identity verification.
    pub fn load<H: I2CHandle>(protocol: &mut RegisterProtocol<H>) -> Result<Self, BusError> {
        let bytes = protocol.read_burst::<CALIBRATION_LEN>(Register::Calib00)?;
        let calibration = Self::from(bytes);
        log::debug!(
            "{:#04x} calibration t1={} t2={} t3={}",
            protocol.address(),
            calibration.t1,
            calibration.t2,
            calibration.t3
        );
        Ok(calibration)
    }
}

impl From<[u8; CALIBRATION_LEN]> for CalibrationTriple {
    fn from(bytes: [u8; CALIBRATION_LEN]) -> Self {
        Self {
            t1: u16::from_le_bytes([bytes[0], bytes[1]]),
            t2: i16::from_le_bytes([bytes[2], bytes[3]]),
            t3: i16::from_le_bytes([bytes[4], bytes[5]]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CalibrationTriple;
    use crate::common::i2c::{FakeBmp280, I2CFault, I2COp, RecordingI2CHandle};
    use crate::common::protocol::RegisterProtocol;
    use crate::common::registers::DEFAULT_I2C_ADDRESS;

    #[test_log::test]
    fn test_decode_little_endian_pairs() {
        let calibration = CalibrationTriple::from([0x6F, 0x6E, 0x67, 0x93, 0x32, 0x00]);
        assert_eq!(
            calibration,
            CalibrationTriple {
                t1: 28271,
                t2: -27801,
                t3: 50
            }
        );
    }

    #[test_log::test]
    fn test_load_is_a_single_burst() {
        let handle = RecordingI2CHandle::new(
            FakeBmp280::new("i2c0".to_string())
                .with_calibration([0x6F, 0x6E, 0x67, 0x93, 0x32, 0x00]),
        );
        let ops = handle.ops();
        let mut protocol = RegisterProtocol::new(handle, DEFAULT_I2C_ADDRESS);
        let calibration = CalibrationTriple::load(&mut protocol).unwrap();
        assert_eq!(calibration.t1, 0x6E6F);
        assert_eq!(calibration.t2, 0x9367_u16 as i16);
        assert_eq!(calibration.t3, 0x0032);
        assert_eq!(
            *ops.lock().unwrap(),
            vec![I2COp::Write(vec![0x88]), I2COp::Read(6)]
        );
    }

    #[test_log::test]
    fn test_load_surfaces_bus_error() {
        let handle = RecordingI2CHandle::new(FakeBmp280::new("i2c0".to_string()))
            .with_fault(I2CFault::ShortReads(5));
        let mut protocol = RegisterProtocol::new(handle, DEFAULT_I2C_ADDRESS);
        assert!(CalibrationTriple::load(&mut protocol).is_err());
    }
}
