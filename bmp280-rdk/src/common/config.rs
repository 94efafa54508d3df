use std::collections::HashMap;
use std::num::{ParseFloatError, ParseIntError};
use std::time::Duration;

use thiserror::Error;

use super::conversion::{StatusPolling, DEFAULT_MAX_STATUS_POLLS, DEFAULT_STATUS_POLL_QUANTUM};
use super::registers::DEFAULT_I2C_ADDRESS;
use super::scheduler::FailurePolicy;
use super::settings::{Configuration, FilterCoefficient, Oversampling, PowerMode, StandbyTime};

const MAX_I2C_ADDRESS: u8 = 0x7F;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Error, Debug, Eq, PartialEq)]
pub enum AttributeError {
    #[error("failed to parse number")]
    ParseNumError,
    #[error("value not possible")]
    ConversionImpossibleError,
    #[error("attribute `{0}` was not found")]
    KeyNotFound(String),
    #[error("{0}")]
    ValidationError(String),
}

impl From<ParseIntError> for AttributeError {
    fn from(_: ParseIntError) -> AttributeError {
        AttributeError::ParseNumError
    }
}

impl From<ParseFloatError> for AttributeError {
    fn from(_: ParseFloatError) -> AttributeError {
        AttributeError::ParseNumError
    }
}

macro_rules! primitives
{
    ( $($t:ty),* ) =>
    {
        $(
          impl TryFrom<&Kind> for $t
          {
              type Error = AttributeError;
              fn try_from(value: &Kind) -> Result<Self, Self::Error> {
                  match value {
                      Kind::NullValue(v) => Ok(*v as $t),
                      Kind::NumberValue(v) => Ok(*v as $t),
                      Kind::BoolValue(v) => Ok(*v as $t),
                      Kind::StringValue(v) => Ok(v.parse::<$t>()?),
                      _ => Err(AttributeError::ConversionImpossibleError),
                  }
              }
          }
        )*
    }
}
primitives!(u64, u32, u16, u8, i32, usize);

impl TryFrom<&Kind> for f64 {
    type Error = AttributeError;
    fn try_from(value: &Kind) -> Result<Self, Self::Error> {
        match value {
            Kind::NullValue(v) => Ok(*v as f64),
            Kind::NumberValue(v) => Ok(*v),
            Kind::StringValue(v) => Ok(v.parse::<f64>()?),
            _ => Err(AttributeError::ConversionImpossibleError),
        }
    }
}

impl TryFrom<&Kind> for String {
    type Error = AttributeError;
    fn try_from(value: &Kind) -> Result<Self, Self::Error> {
        match value {
            Kind::StringValue(v) => Ok(v.to_string()),
            _ => Err(AttributeError::ConversionImpossibleError),
        }
    }
}

impl<'b> TryFrom<&'b Kind> for &'b str {
    type Error = AttributeError;
    fn try_from(value: &'b Kind) -> Result<Self, Self::Error> {
        match value {
            Kind::StringValue(v) => Ok(v.as_str()),
            _ => Err(AttributeError::ConversionImpossibleError),
        }
    }
}

impl TryFrom<&Kind> for bool {
    type Error = AttributeError;
    fn try_from(value: &Kind) -> Result<Self, Self::Error> {
        match value {
            Kind::BoolValue(v) => Ok(*v),
            _ => Err(AttributeError::ConversionImpossibleError),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    NullValue(i32),
    NumberValue(f64),
    StringValue(String),
    BoolValue(bool),
    VecValue(Vec<Kind>),
    StructValue(HashMap<String, Kind>),
}

impl Kind {
    pub fn get(&self, key: &str) -> Result<Option<&Kind>, AttributeError> {
        match self {
            Self::StructValue(v) => Ok(v.get(key)),
            _ => Err(AttributeError::KeyNotFound(key.to_string())),
        }
    }

    pub fn contains_key(&self, key: &str) -> Result<bool, AttributeError> {
        match self {
            Self::StructValue(v) => Ok(v.contains_key(key)),
            _ => Err(AttributeError::KeyNotFound(key.to_string())),
        }
    }

    /// Converts the attribute at `key` when present, `None` when absent.
    pub fn get_optional<'a, T>(&'a self, key: &str) -> Result<Option<T>, AttributeError>
    where
        T: TryFrom<&'a Kind, Error = AttributeError>,
    {
        self.get(key)?.map(T::try_from).transpose()
    }
}

impl From<serde_json::Value> for Kind {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Kind::NullValue(0),
            serde_json::Value::Bool(v) => Kind::BoolValue(v),
            serde_json::Value::Number(v) => Kind::NumberValue(v.as_f64().unwrap_or_default()),
            serde_json::Value::String(v) => Kind::StringValue(v),
            serde_json::Value::Array(v) => Kind::VecValue(v.into_iter().map(Kind::from).collect()),
            serde_json::Value::Object(v) => {
                Kind::StructValue(v.into_iter().map(|(k, v)| (k, Kind::from(v))).collect())
            }
        }
    }
}

impl TryFrom<&Kind> for FailurePolicy {
    type Error = AttributeError;
    fn try_from(value: &Kind) -> Result<Self, Self::Error> {
        match value {
            Kind::StringValue(v) if v == "stop" => Ok(FailurePolicy::Stop),
            Kind::StructValue(_) => {
                let retry = value
                    .get("retry")?
                    .ok_or_else(|| AttributeError::KeyNotFound("retry".to_string()))?;
                let backoff_ms: u64 = retry.get_optional("backoff_ms")?.unwrap_or(0);
                let max_attempts: Option<u32> = retry.get_optional("max_attempts")?;
                if max_attempts == Some(0) {
                    return Err(AttributeError::ValidationError(
                        "retry max_attempts must be at least 1".to_string(),
                    ));
                }
                Ok(FailurePolicy::Retry {
                    backoff: Duration::from_millis(backoff_ms),
                    max_attempts,
                })
            }
            Kind::StringValue(v) => Err(AttributeError::ValidationError(format!(
                "unknown failure policy {v}"
            ))),
            _ => Err(AttributeError::ConversionImpossibleError),
        }
    }
}

/// Everything needed to bring up and poll one device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bmp280Config {
    pub i2c_address: u8,
    pub configuration: Configuration,
    pub poll_interval: Duration,
    pub status_polling: StatusPolling,
    pub failure_policy: FailurePolicy,
}

impl Default for Bmp280Config {
    fn default() -> Self {
        Self {
            i2c_address: DEFAULT_I2C_ADDRESS,
            configuration: Configuration::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            status_polling: StatusPolling::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl Bmp280Config {
    pub fn from_json(json: &str) -> Result<Self, AttributeError> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|err| AttributeError::ValidationError(err.to_string()))?;
        Self::try_from(&Kind::from(value))
    }
}

fn non_zero(key: &str, value: u64) -> Result<u64, AttributeError> {
    if value == 0 {
        return Err(AttributeError::ValidationError(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(value)
}

impl TryFrom<&Kind> for Bmp280Config {
    type Error = AttributeError;
    fn try_from(value: &Kind) -> Result<Self, Self::Error> {
        let defaults = Configuration::default();
        let configuration = Configuration {
            oversampling: value
                .get_optional::<Oversampling>("oversampling")?
                .unwrap_or(defaults.oversampling),
            filter_coefficient: value
                .get_optional::<FilterCoefficient>("filter_coefficient")?
                .unwrap_or(defaults.filter_coefficient),
            standby_time: value
                .get_optional::<StandbyTime>("standby_time")?
                .unwrap_or(defaults.standby_time),
            power_mode: value
                .get_optional::<PowerMode>("power_mode")?
                .unwrap_or(defaults.power_mode),
        };
        if configuration.power_mode == PowerMode::Forced {
            return Err(AttributeError::ValidationError(
                "power_mode forced cannot be configured".to_string(),
            ));
        }

        let i2c_address = match value.get("i2c_address")? {
            Some(Kind::NumberValue(v))
                if (0.0..=f64::from(MAX_I2C_ADDRESS)).contains(v) && v.fract() == 0.0 =>
            {
                *v as u8
            }
            Some(Kind::StringValue(v)) => {
                let address = match v.strip_prefix("0x") {
                    Some(hex) => u8::from_str_radix(hex, 16)?,
                    None => v.parse::<u8>()?,
                };
                if address > MAX_I2C_ADDRESS {
                    return Err(AttributeError::ValidationError(format!(
                        "i2c_address {v} is not a 7-bit address"
                    )));
                }
                address
            }
            Some(other) => {
                return Err(AttributeError::ValidationError(format!(
                    "invalid i2c_address {other:?}"
                )))
            }
            None => DEFAULT_I2C_ADDRESS,
        };

        let poll_interval = match value.get_optional::<u64>("poll_interval_ms")? {
            Some(ms) => Duration::from_millis(non_zero("poll_interval_ms", ms)?),
            None => DEFAULT_POLL_INTERVAL,
        };
        let status_polling = StatusPolling {
            quantum: value
                .get_optional::<u64>("status_poll_ms")?
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_STATUS_POLL_QUANTUM),
            max_polls: match value.get_optional::<u32>("max_status_polls")? {
                Some(polls) => non_zero("max_status_polls", polls.into())? as u32,
                None => DEFAULT_MAX_STATUS_POLLS,
            },
        };
        let failure_policy = value
            .get_optional::<FailurePolicy>("on_failure")?
            .unwrap_or_default();

        Ok(Self {
            i2c_address,
            configuration,
            poll_interval,
            status_polling,
            failure_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{AttributeError, Bmp280Config, Kind};
    use crate::common::scheduler::FailurePolicy;
    use crate::common::settings::{FilterCoefficient, Oversampling, PowerMode, StandbyTime};

    #[test_log::test]
    fn test_primitives() {
        assert_eq!(u8::try_from(&Kind::NumberValue(118.0)), Ok(118));
        assert_eq!(u32::try_from(&Kind::StringValue("50".to_string())), Ok(50));
        assert_eq!(
            u32::try_from(&Kind::StringValue("fifty".to_string())),
            Err(AttributeError::ParseNumError)
        );
        assert_eq!(
            bool::try_from(&Kind::NumberValue(1.0)),
            Err(AttributeError::ConversionImpossibleError)
        );
        let s = Kind::StringValue("normal".to_string());
        let s: &str = (&s).try_into().unwrap();
        assert_eq!(s, "normal");
    }

    #[test_log::test]
    fn test_get_on_non_struct() {
        let kind = Kind::NumberValue(1.0);
        assert_eq!(
            kind.get("a"),
            Err(AttributeError::KeyNotFound("a".to_string()))
        );
        let kind = Kind::StructValue(HashMap::from([(
            "a".to_string(),
            Kind::BoolValue(true),
        )]));
        assert_eq!(kind.contains_key("a"), Ok(true));
        assert_eq!(kind.contains_key("b"), Ok(false));
    }

    #[test_log::test]
    fn test_json_to_kind() {
        let value = serde_json::json!({"a": [1, "two", null, false]});
        let kind = Kind::from(value);
        assert_eq!(
            kind.get("a").unwrap(),
            Some(&Kind::VecValue(vec![
                Kind::NumberValue(1.0),
                Kind::StringValue("two".to_string()),
                Kind::NullValue(0),
                Kind::BoolValue(false),
            ]))
        );
    }

    #[test_log::test]
    fn test_empty_config_is_default() {
        assert_eq!(Bmp280Config::from_json("{}").unwrap(), Bmp280Config::default());
        let config = Bmp280Config::default();
        assert_eq!(config.i2c_address, 0x76);
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.status_polling.quantum, Duration::from_millis(10));
        assert_eq!(config.status_polling.max_polls, 50);
        assert_eq!(config.failure_policy, FailurePolicy::Stop);
    }

    #[test_log::test]
    fn test_full_config() {
        let config = Bmp280Config::from_json(
            r#"{
                "i2c_address": "0x77",
                "oversampling": "x16",
                "filter_coefficient": 2,
                "standby_time": "62.5",
                "power_mode": "sleep",
                "poll_interval_ms": 500,
                "status_poll_ms": 5,
                "max_status_polls": 20,
                "on_failure": {"retry": {"backoff_ms": 250, "max_attempts": 3}}
            }"#,
        )
        .unwrap();
        assert_eq!(config.i2c_address, 0x77);
        assert_eq!(config.configuration.oversampling, Oversampling::X16);
        assert_eq!(config.configuration.filter_coefficient, FilterCoefficient::C4);
        assert_eq!(config.configuration.standby_time, StandbyTime::Ms62_5);
        assert_eq!(config.configuration.power_mode, PowerMode::Sleep);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.status_polling.quantum, Duration::from_millis(5));
        assert_eq!(config.status_polling.max_polls, 20);
        assert_eq!(
            config.failure_policy,
            FailurePolicy::Retry {
                backoff: Duration::from_millis(250),
                max_attempts: Some(3)
            }
        );
    }

    #[test_log::test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            Bmp280Config::from_json(r#"{"oversampling": "x3"}"#),
            Err(AttributeError::ValidationError(_))
        ));
        assert!(Bmp280Config::from_json(r#"{"power_mode": "forced"}"#).is_err());
        assert!(Bmp280Config::from_json(r#"{"poll_interval_ms": 0}"#).is_err());
        assert!(Bmp280Config::from_json(r#"{"max_status_polls": 0}"#).is_err());
        assert!(Bmp280Config::from_json(r#"{"i2c_address": 300}"#).is_err());
        assert!(Bmp280Config::from_json(r#"{"i2c_address": 128}"#).is_err());
        assert!(Bmp280Config::from_json(r#"{"i2c_address": "0xFF"}"#).is_err());
        assert!(Bmp280Config::from_json(r#"{"i2c_address": "0x80"}"#).is_err());
        assert!(Bmp280Config::from_json(r#"{"i2c_address": "200"}"#).is_err());
        assert_eq!(
            Bmp280Config::from_json(r#"{"i2c_address": "0x7F"}"#)
                .unwrap()
                .i2c_address,
            0x7F
        );
        assert!(Bmp280Config::from_json(r#"{"on_failure": "sometimes"}"#).is_err());
        assert!(Bmp280Config::from_json(
            r#"{"on_failure": {"retry": {"max_attempts": 0}}}"#
        )
        .is_err());
        assert!(Bmp280Config::from_json("not json").is_err());
    }

    #[test_log::test]
    fn test_retry_without_limit() {
        let config =
            Bmp280Config::from_json(r#"{"on_failure": {"retry": {"backoff_ms": 10}}}"#).unwrap();
        assert_eq!(
            config.failure_policy,
            FailurePolicy::Retry {
                backoff: Duration::from_millis(10),
                max_attempts: None
            }
        );
    }
}
