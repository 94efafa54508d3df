//! Polling driver for BMP280-class temperature sensors attached to an I2C bus.
//!
//! The host-independent driver lives in [common]; host plumbing (attribute
//! directory, logger backends) lives in `native`.

pub mod common;

#[cfg(feature = "native")]
pub mod native;
