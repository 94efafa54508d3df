use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::config::Kind;
use super::device::Bmp280;
use super::error::Bmp280Error;
use super::i2c::I2CHandle;

pub type TypedReadingsResult<T> = HashMap<String, T>;

pub type GenericReadingsResult = HashMap<String, Kind>;

pub trait Readings {
    fn get_generic_readings(&self) -> Result<GenericReadingsResult, Bmp280Error>;
}

pub trait SensorT<T>: Readings {
    fn get_readings(&self) -> Result<TypedReadingsResult<T>, Bmp280Error>;
}

impl<H: I2CHandle> SensorT<f64> for Bmp280<H> {
    /// `raw_temperature`, `temperature_celsius` and `poll_sequence`, once a
    /// first reading exists.
    fn get_readings(&self) -> Result<TypedReadingsResult<f64>, Bmp280Error> {
        let state = self.state();
        let raw = state.raw_temperature.ok_or(Bmp280Error::NoReading)?;
        let temperature = state.temperature().ok_or(Bmp280Error::NoReading)?;
        Ok(HashMap::from([
            ("raw_temperature".to_string(), f64::from(raw.value())),
            ("temperature_celsius".to_string(), temperature.celsius()),
            ("poll_sequence".to_string(), state.poll_sequence as f64),
        ]))
    }
}

impl<H: I2CHandle> Readings for Bmp280<H> {
    fn get_generic_readings(&self) -> Result<GenericReadingsResult, Bmp280Error> {
        Ok(self
            .get_readings()?
            .into_iter()
            .map(|(k, v)| (k, Kind::NumberValue(v)))
            .collect())
    }
}

impl<A> Readings for Mutex<A>
where
    A: ?Sized + Readings,
{
    fn get_generic_readings(&self) -> Result<GenericReadingsResult, Bmp280Error> {
        self.lock().unwrap().get_generic_readings()
    }
}

impl<A> Readings for Arc<A>
where
    A: ?Sized + Readings,
{
    fn get_generic_readings(&self) -> Result<GenericReadingsResult, Bmp280Error> {
        (**self).get_generic_readings()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{Readings, SensorT};
    use crate::common::config::{Bmp280Config, Kind};
    use crate::common::conversion::StatusPolling;
    use crate::common::device::Bmp280;
    use crate::common::error::Bmp280Error;
    use crate::common::i2c::FakeBmp280;

    fn device() -> Bmp280<FakeBmp280> {
        let config = Bmp280Config {
            status_polling: StatusPolling {
                quantum: Duration::ZERO,
                max_polls: 5,
            },
            ..Default::default()
        };
        Bmp280::new(FakeBmp280::new("i2c0".to_string()), &config).unwrap()
    }

    #[test_log::test]
    fn test_no_readings_before_first_conversion() {
        assert!(matches!(device().get_readings(), Err(Bmp280Error::NoReading)));
    }

    #[test_log::test]
    fn test_readings() {
        let device = device();
        device.convert().unwrap();
        let readings = device.get_readings().unwrap();
        assert_eq!(readings.get("raw_temperature"), Some(&519888.0));
        assert_eq!(readings.get("temperature_celsius"), Some(&25.08));
        assert_eq!(readings.get("poll_sequence"), Some(&1.0));
    }

    #[test_log::test]
    fn test_generic_readings_through_wrappers() {
        let device = Arc::new(Mutex::new(device()));
        device.lock().unwrap().convert().unwrap();
        let readings = device.get_generic_readings().unwrap();
        assert_eq!(
            readings.get("temperature_celsius"),
            Some(&Kind::NumberValue(25.08))
        );
    }
}
