//! Measurement settings and the configurator writing them to the device.
//!
//! Every setting is a closed enumeration. Raw codes, labels and attribute
//! values are validated while converting into these types, so an out of range
//! value is rejected before any bus transaction.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::config::{AttributeError, Kind};
use super::error::Bmp280Error;
use super::i2c::I2CHandle;
use super::protocol::{BusError, RegisterProtocol};
use super::registers::{
    Register, CONFIG_FILTER_MASK, CONFIG_STANDBY_MASK, CTRL_MEAS_MODE_MASK, CTRL_MEAS_OSRS_T_MASK,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field} value: {value}")]
pub struct InvalidConfiguration {
    pub field: &'static str,
    pub value: String,
}

impl InvalidConfiguration {
    pub fn new(field: &'static str, value: impl fmt::Display) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

// lets setters accept already typed values alongside raw codes and labels
impl From<Infallible> for InvalidConfiguration {
    fn from(value: Infallible) -> Self {
        match value {}
    }
}

fn code_from_kind(field: &'static str, value: f64) -> Result<u8, AttributeError> {
    if value.fract() != 0.0 || !(0.0..=f64::from(u8::MAX)).contains(&value) {
        return Err(AttributeError::ValidationError(
            InvalidConfiguration::new(field, value).to_string(),
        ));
    }
    Ok(value as u8)
}

macro_rules! register_field {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal, shift = $shift:literal,
        { $($variant:ident = $code:literal => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const FIELD: &'static str = $field;

            /// Field value before shifting into its register position.
            pub fn code(self) -> u8 {
                match self {
                    $(Self::$variant => $code),+
                }
            }

            pub fn register_bits(self) -> u8 {
                self.code() << $shift
            }

            pub fn label(self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }
        }

        impl TryFrom<u8> for $name {
            type Error = InvalidConfiguration;
            fn try_from(code: u8) -> Result<Self, Self::Error> {
                match code {
                    $($code => Ok(Self::$variant),)+
                    _ => Err(InvalidConfiguration::new($field, code)),
                }
            }
        }

        impl FromStr for $name {
            type Err = InvalidConfiguration;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($label => Ok(Self::$variant),)+
                    other => Err(InvalidConfiguration::new($field, other)),
                }
            }
        }

        impl TryFrom<&str> for $name {
            type Error = InvalidConfiguration;
            fn try_from(s: &str) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self.label(), f)
            }
        }

        // numbers are raw field codes, strings are labels
        impl TryFrom<&Kind> for $name {
            type Error = AttributeError;
            fn try_from(value: &Kind) -> Result<Self, Self::Error> {
                let parsed = match value {
                    Kind::NumberValue(v) => Self::try_from(code_from_kind($field, *v)?),
                    Kind::StringValue(v) => v.parse(),
                    _ => return Err(AttributeError::ConversionImpossibleError),
                };
                parsed.map_err(|err| AttributeError::ValidationError(err.to_string()))
            }
        }
    };
}

register_field!(
    /// Temperature oversampling, osrs_t in ctrl_meas.
    Oversampling, "oversampling", shift = 5,
    {
        Skipped = 0 => "skipped",
        X1 = 1 => "x1",
        X2 = 2 => "x2",
        X4 = 3 => "x4",
        X8 = 4 => "x8",
        X16 = 5 => "x16",
    }
);

register_field!(
    /// IIR filter coefficient, filter in config.
    FilterCoefficient, "filter_coefficient", shift = 2,
    {
        Off = 0 => "off",
        C2 = 1 => "2",
        C4 = 2 => "4",
        C8 = 3 => "8",
        C16 = 4 => "16",
    }
);

register_field!(
    /// Inactive duration between measurements in normal mode, t_sb in config.
    /// Labels are milliseconds.
    StandbyTime, "standby_time", shift = 5,
    {
        Ms0_5 = 0 => "0.5",
        Ms62_5 = 1 => "62.5",
        Ms125 = 2 => "125",
        Ms250 = 3 => "250",
        Ms500 = 4 => "500",
        Ms1000 = 5 => "1000",
        Ms2000 = 6 => "2000",
        Ms4000 = 7 => "4000",
    }
);

/// mode[1:0] in ctrl_meas. Both `01` and `10` mean forced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PowerMode {
    Sleep,
    Forced,
    Normal,
}

impl PowerMode {
    pub const FIELD: &'static str = "power_mode";

    pub fn code(self) -> u8 {
        match self {
            Self::Sleep => 0b00,
            Self::Forced => 0b01,
            Self::Normal => 0b11,
        }
    }

    pub fn register_bits(self) -> u8 {
        self.code()
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Sleep => "sleep",
            Self::Forced => "forced",
            Self::Normal => "normal",
        }
    }
}

impl TryFrom<u8> for PowerMode {
    type Error = InvalidConfiguration;
    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0b00 => Ok(Self::Sleep),
            0b01 | 0b10 => Ok(Self::Forced),
            0b11 => Ok(Self::Normal),
            _ => Err(InvalidConfiguration::new(Self::FIELD, code)),
        }
    }
}

impl FromStr for PowerMode {
    type Err = InvalidConfiguration;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "sleep" => Ok(Self::Sleep),
            "forced" => Ok(Self::Forced),
            "normal" => Ok(Self::Normal),
            other => Err(InvalidConfiguration::new(Self::FIELD, other)),
        }
    }
}

impl TryFrom<&str> for PowerMode {
    type Error = InvalidConfiguration;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for PowerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.label(), f)
    }
}

impl TryFrom<&Kind> for PowerMode {
    type Error = AttributeError;
    fn try_from(value: &Kind) -> Result<Self, Self::Error> {
        let parsed = match value {
            Kind::NumberValue(v) => Self::try_from(code_from_kind(Self::FIELD, *v)?),
            Kind::StringValue(v) => v.parse(),
            _ => return Err(AttributeError::ConversionImpossibleError),
        };
        parsed.map_err(|err| AttributeError::ValidationError(err.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Configuration {
    pub oversampling: Oversampling,
    pub filter_coefficient: FilterCoefficient,
    pub standby_time: StandbyTime,
    pub power_mode: PowerMode,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            oversampling: Oversampling::X1,
            filter_coefficient: FilterCoefficient::C16,
            standby_time: StandbyTime::Ms500,
            power_mode: PowerMode::Normal,
        }
    }
}

/// Writes settings through read-modify-write of the owning register.
///
/// Each setter validates first and then issues exactly one modify, so a
/// rejected value never reaches the bus.
pub struct DeviceConfigurator<'a, H> {
    protocol: &'a mut RegisterProtocol<H>,
}

impl<'a, H: I2CHandle> DeviceConfigurator<'a, H> {
    pub fn new(protocol: &'a mut RegisterProtocol<H>) -> Self {
        Self { protocol }
    }

    pub fn set_oversampling<V>(&mut self, value: V) -> Result<Oversampling, Bmp280Error>
    where
        V: TryInto<Oversampling>,
        InvalidConfiguration: From<V::Error>,
    {
        let value = value.try_into().map_err(InvalidConfiguration::from)?;
        self.protocol.modify_register(
            Register::CtrlMeas,
            CTRL_MEAS_OSRS_T_MASK,
            value.register_bits(),
        )?;
        Ok(value)
    }

    pub fn set_filter_coefficient<V>(&mut self, value: V) -> Result<FilterCoefficient, Bmp280Error>
    where
        V: TryInto<FilterCoefficient>,
        InvalidConfiguration: From<V::Error>,
    {
        let value = value.try_into().map_err(InvalidConfiguration::from)?;
        self.protocol.modify_register(
            Register::Config,
            CONFIG_FILTER_MASK,
            value.register_bits(),
        )?;
        Ok(value)
    }

    pub fn set_standby_time<V>(&mut self, value: V) -> Result<StandbyTime, Bmp280Error>
    where
        V: TryInto<StandbyTime>,
        InvalidConfiguration: From<V::Error>,
    {
        let value = value.try_into().map_err(InvalidConfiguration::from)?;
        self.protocol.modify_register(
            Register::Config,
            CONFIG_STANDBY_MASK,
            value.register_bits(),
        )?;
        Ok(value)
    }

    /// Forced mode is reserved for the conversion handshake and rejected here.
    pub fn set_power_mode<V>(&mut self, value: V) -> Result<PowerMode, Bmp280Error>
    where
        V: TryInto<PowerMode>,
        InvalidConfiguration: From<V::Error>,
    {
        let value = value.try_into().map_err(InvalidConfiguration::from)?;
        if value == PowerMode::Forced {
            return Err(InvalidConfiguration::new(PowerMode::FIELD, value).into());
        }
        self.write_mode(value)?;
        Ok(value)
    }

    pub(crate) fn trigger_forced(&mut self) -> Result<(), BusError> {
        self.write_mode(PowerMode::Forced)
    }

    fn write_mode(&mut self, mode: PowerMode) -> Result<(), BusError> {
        self.protocol
            .modify_register(Register::CtrlMeas, CTRL_MEAS_MODE_MASK, mode.register_bits())
    }

    /// Applies every field, power mode last so the device starts measuring
    /// with its final settings.
    pub fn apply(&mut self, configuration: &Configuration) -> Result<(), Bmp280Error> {
        self.set_oversampling(configuration.oversampling)?;
        self.set_filter_coefficient(configuration.filter_coefficient)?;
        self.set_standby_time(configuration.standby_time)?;
        self.set_power_mode(configuration.power_mode)?;
        Ok(())
    }
}
