//! Structs, traits, and utils making up the BMP280 driver.
//!
//! # Driver core
//! - [protocol]
//! - [calibration]
//! - [compensation]
//! - [settings]
//! - [conversion]
//! - [device]
//! - [scheduler]
//! - [sensor]
//!
//! # Utils
//! - [error]
//! - [i2c]
//! - [registers]
//! - [config]
//! - [exec]
//! - [log]

pub mod calibration;
pub mod compensation;
pub mod config;
pub mod conversion;
pub mod device;
pub mod error;
pub mod exec;
pub mod i2c;
pub mod log;
pub mod protocol;
pub mod registers;
pub mod scheduler;
pub mod sensor;
pub mod settings;
