//! Raw ADC counts to degrees, using the manufacturer's 32-bit fixed-point
//! compensation routine.
//!
//! The arithmetic must stay bit-exact with the datasheet reference. Inputs
//! outside the sensor's physical range wrap instead of panicking; the result
//! is then out of range but not an error.

use std::fmt;

use super::calibration::CalibrationTriple;
use super::registers::TEMPERATURE_LEN;

const RAW_MASK: u32 = 0xF_FFFF;

/// 20-bit temperature ADC reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RawTemperature(u32);

impl RawTemperature {
    /// Masks `value` to 20 bits.
    pub fn new(value: u32) -> Self {
        Self(value & RAW_MASK)
    }

    /// Assembles msb, lsb and the top nibble of xlsb.
    pub fn from_burst(bytes: [u8; TEMPERATURE_LEN]) -> Self {
        Self::new(((bytes[0] as u32) << 12) | ((bytes[1] as u32) << 4) | ((bytes[2] as u32) >> 4))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RawTemperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Temperature in hundredths of a degree Celsius, 2357 == 23.57 °C.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalibratedTemperature(i32);

impl CalibratedTemperature {
    pub fn from_centi_celsius(centi: i32) -> Self {
        Self(centi)
    }

    pub fn centi_celsius(self) -> i32 {
        self.0
    }

    pub fn celsius(self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl fmt::Display for CalibratedTemperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// The shared intermediate (`t_fine`) of the datasheet routine.
pub fn fine_temperature(raw: RawTemperature, calibration: &CalibrationTriple) -> i32 {
    let adc = raw.value() as i32;
    let t1 = calibration.t1 as i32;
    let t2 = calibration.t2 as i32;
    let t3 = calibration.t3 as i32;

    let a = (adc >> 3).wrapping_sub(t1 << 1);
    let b = (adc >> 4).wrapping_sub(t1);
    let var1 = a.wrapping_mul(t2) >> 11;
    let var2 = (b.wrapping_mul(b) >> 12).wrapping_mul(t3) >> 14;
    var1.wrapping_add(var2)
}

pub fn compensate(raw: RawTemperature, calibration: &CalibrationTriple) -> CalibratedTemperature {
    let fine = fine_temperature(raw, calibration);
    CalibratedTemperature(fine.wrapping_mul(5).wrapping_add(128) >> 8)
}
