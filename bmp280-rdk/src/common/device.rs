//! One BMP280 instance: owns its transport, calibration, configuration and
//! last reading.
//!
//! A device only exists once initialization fully succeeded (identity
//! verified, reset, calibration loaded, configuration applied). Readers get
//! copies of [DeviceState]; only conversions and the setters mutate it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::sleep;

use super::calibration::CalibrationTriple;
use super::compensation::{compensate, CalibratedTemperature, RawTemperature};
use super::config::Bmp280Config;
use super::conversion::{ConversionSequencer, StatusPolling};
use super::error::Bmp280Error;
use super::i2c::I2CHandle;
use super::protocol::RegisterProtocol;
use super::registers::{Register, StatusRegister, BMP280_CHIP_ID, BMP280_RESET_COMMAND};
use super::scheduler::Pollable;
use super::settings::{
    Configuration, DeviceConfigurator, FilterCoefficient, InvalidConfiguration, Oversampling,
    PowerMode, StandbyTime,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceState {
    /// Last configuration written. Forced conversions do not change it even
    /// though the device falls back to sleep after each one.
    pub configuration: Configuration,
    pub calibration: CalibrationTriple,
    /// `None` until the first successful conversion.
    pub raw_temperature: Option<RawTemperature>,
    /// Completed conversion attempts, successful or not.
    pub poll_sequence: u64,
    pub last_failure: Option<String>,
}

impl DeviceState {
    pub fn temperature(&self) -> Option<CalibratedTemperature> {
        self.raw_temperature
            .map(|raw| compensate(raw, &self.calibration))
    }
}

// clears the in-flight flag however the conversion ends
struct ConversionGuard<'a>(&'a AtomicBool);

impl<'a> ConversionGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, Bmp280Error> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Bmp280Error::ConversionInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for ConversionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Bmp280<H: I2CHandle> {
    bus: Mutex<RegisterProtocol<H>>,
    state: Mutex<DeviceState>,
    status_polling: StatusPolling,
    converting: AtomicBool,
}

impl<H: I2CHandle> Bmp280<H> {
    pub fn new(handle: H, config: &Bmp280Config) -> Result<Self, Bmp280Error> {
        let mut protocol = RegisterProtocol::new(handle, config.i2c_address);
        let address = protocol.address();

        let found = protocol.read_register(Register::Id)?;
        if found != BMP280_CHIP_ID {
            log::error!(
                "{:#04x} is not a bmp280, id register reads {:#04x}",
                address,
                found
            );
            return Err(Bmp280Error::DeviceIdentityMismatch {
                expected: BMP280_CHIP_ID,
                found,
            });
        }

        protocol.write_register(Register::Reset, BMP280_RESET_COMMAND)?;
        wait_for_nvm_copy(&mut protocol, &config.status_polling)?;

        let calibration = CalibrationTriple::load(&mut protocol)?;
        DeviceConfigurator::new(&mut protocol).apply(&config.configuration)?;
        log::info!(
            "bmp280 ready at {:#04x} on {}, {:?}",
            address,
            protocol.handle().name(),
            config.configuration
        );

        Ok(Self {
            bus: Mutex::new(protocol),
            state: Mutex::new(DeviceState {
                configuration: config.configuration,
                calibration,
                raw_temperature: None,
                poll_sequence: 0,
                last_failure: None,
            }),
            status_polling: config.status_polling,
            converting: AtomicBool::new(false),
        })
    }

    fn lock_bus(&self) -> MutexGuard<'_, RegisterProtocol<H>> {
        self.bus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> DeviceState {
        self.lock_state().clone()
    }

    pub fn raw_temperature(&self) -> Option<RawTemperature> {
        self.lock_state().raw_temperature
    }

    pub fn calibration(&self) -> CalibrationTriple {
        self.lock_state().calibration
    }

    pub fn configuration(&self) -> Configuration {
        self.lock_state().configuration
    }

    pub fn poll_sequence(&self) -> u64 {
        self.lock_state().poll_sequence
    }

    /// Computed from the last raw reading on every call.
    pub fn temperature(&self) -> Result<CalibratedTemperature, Bmp280Error> {
        self.lock_state().temperature().ok_or(Bmp280Error::NoReading)
    }

    /// Runs one forced-mode conversion and stores its raw value. A failed
    /// conversion leaves the previous reading in place.
    pub fn convert(&self) -> Result<RawTemperature, Bmp280Error> {
        let _guard = ConversionGuard::acquire(&self.converting)?;
        let result = {
            let mut bus = self.lock_bus();
            ConversionSequencer::new(&mut *bus, self.status_polling).run()
        };

        let mut state = self.lock_state();
        state.poll_sequence += 1;
        match &result {
            Ok(raw) => {
                log::debug!("poll {}: raw temperature {}", state.poll_sequence, raw);
                state.raw_temperature = Some(*raw);
                state.last_failure = None;
            }
            Err(err) => {
                log::warn!("poll {}: conversion failed: {}", state.poll_sequence, err);
                state.last_failure = Some(err.to_string());
            }
        }
        result
    }

    pub fn set_oversampling<V>(&self, value: V) -> Result<Oversampling, Bmp280Error>
    where
        V: TryInto<Oversampling>,
        InvalidConfiguration: From<V::Error>,
    {
        let value = DeviceConfigurator::new(&mut *self.lock_bus()).set_oversampling(value)?;
        self.lock_state().configuration.oversampling = value;
        Ok(value)
    }

    pub fn set_filter_coefficient<V>(&self, value: V) -> Result<FilterCoefficient, Bmp280Error>
    where
        V: TryInto<FilterCoefficient>,
        InvalidConfiguration: From<V::Error>,
    {
        let value = DeviceConfigurator::new(&mut *self.lock_bus()).set_filter_coefficient(value)?;
        self.lock_state().configuration.filter_coefficient = value;
        Ok(value)
    }

    pub fn set_standby_time<V>(&self, value: V) -> Result<StandbyTime, Bmp280Error>
    where
        V: TryInto<StandbyTime>,
        InvalidConfiguration: From<V::Error>,
    {
        let value = DeviceConfigurator::new(&mut *self.lock_bus()).set_standby_time(value)?;
        self.lock_state().configuration.standby_time = value;
        Ok(value)
    }

    pub fn set_power_mode<V>(&self, value: V) -> Result<PowerMode, Bmp280Error>
    where
        V: TryInto<PowerMode>,
        InvalidConfiguration: From<V::Error>,
    {
        let value = DeviceConfigurator::new(&mut *self.lock_bus()).set_power_mode(value)?;
        self.lock_state().configuration.power_mode = value;
        Ok(value)
    }

    /// Puts the device to sleep. Waits for an in-flight conversion to release
    /// the bus first.
    pub fn close(&self) -> Result<(), Bmp280Error> {
        self.set_power_mode(PowerMode::Sleep)?;
        Ok(())
    }
}

fn wait_for_nvm_copy<H: I2CHandle>(
    protocol: &mut RegisterProtocol<H>,
    polling: &StatusPolling,
) -> Result<(), Bmp280Error> {
    for poll in 1..=polling.max_polls {
        let status = StatusRegister::from(protocol.read_register(Register::Status)?);
        if !status.im_update() {
            return Ok(());
        }
        if poll < polling.max_polls {
            sleep(polling.quantum);
        }
    }
    Err(Bmp280Error::ResetTimeout {
        polls: polling.max_polls,
    })
}

impl<H: I2CHandle> Drop for Bmp280<H> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::error!("bmp280 close failure: {}", err)
        };
    }
}

impl<H> Pollable for Bmp280<H>
where
    H: I2CHandle + Send + 'static,
{
    fn poll_once(&self) -> Result<(), Bmp280Error> {
        self.convert().map(|_| ())
    }
}
