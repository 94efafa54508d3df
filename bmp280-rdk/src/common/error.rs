use thiserror::Error;

use super::protocol::BusError;
use super::settings::InvalidConfiguration;

#[derive(Error, Debug)]
pub enum Bmp280Error {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    InvalidConfiguration(#[from] InvalidConfiguration),
    #[error("device identity mismatch, expected {expected:#04x} found {found:#04x}")]
    DeviceIdentityMismatch { expected: u8, found: u8 },
    #[error("conversion still measuring after {polls} status polls")]
    ConversionTimeout { polls: u32 },
    #[error("nvm copy still running after {polls} status polls")]
    ResetTimeout { polls: u32 },
    #[error("a conversion is already in progress")]
    ConversionInProgress,
    #[error("no successful reading yet")]
    NoReading,
}
