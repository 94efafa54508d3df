//! BMP280 register map.
//!
//! Only the registers the temperature path touches are modelled, as a closed
//! enumeration so no operation can be issued against an undefined address.

use std::fmt;

use bitfield::{bitfield, BitMut};

pub const BMP280_CHIP_ID: u8 = 0x58;
pub const BMP280_RESET_COMMAND: u8 = 0xB6;
pub const DEFAULT_I2C_ADDRESS: u8 = 0x76;

/// mode[1:0] in ctrl_meas
pub const CTRL_MEAS_MODE_MASK: u8 = 0x03;
/// osrs_t[7:5] in ctrl_meas
pub const CTRL_MEAS_OSRS_T_MASK: u8 = 0xE0;
/// filter[4:2] in config
pub const CONFIG_FILTER_MASK: u8 = 0x1C;
/// t_sb[7:5] in config
pub const CONFIG_STANDBY_MASK: u8 = 0xE0;

pub const CALIBRATION_LEN: usize = 6;
pub const TEMPERATURE_LEN: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    /// dig_T1..dig_T3, little endian
    Calib00 = 0x88,
    /// chip identification, reads 0x58
    Id = 0xD0,
    /// writing 0xB6 runs the power-on-reset procedure
    Reset = 0xE0,
    Status = 0xF3,
    CtrlMeas = 0xF4,
    Config = 0xF5,
    TempMsb = 0xFA,
    TempLsb = 0xFB,
    TempXlsb = 0xFC,
}

impl Register {
    pub const fn addr(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Register::Calib00 => "calib00",
            Register::Id => "id",
            Register::Reset => "reset",
            Register::Status => "status",
            Register::CtrlMeas => "ctrl_meas",
            Register::Config => "config",
            Register::TempMsb => "temp_msb",
            Register::TempLsb => "temp_lsb",
            Register::TempXlsb => "temp_xlsb",
        };
        write!(f, "{name}({:#04x})", self.addr())
    }
}

bitfield! {
    pub struct StatusRegister(u8);
    impl Debug;
    pub measuring, _: 3;
    pub im_update, _: 0;
}

impl StatusRegister {
    pub fn with_flags(measuring: bool, im_update: bool) -> Self {
        let mut status = StatusRegister(0);
        status.set_bit(3, measuring);
        status.set_bit(0, im_update);
        status
    }
}

bitfield! {
    pub struct CtrlMeas(u8);
    impl Debug;
    pub u8, osrs_t, set_osrs_t: 7, 5;
    pub u8, osrs_p, set_osrs_p: 4, 2;
    pub u8, mode, set_mode: 1, 0;
}

bitfield! {
    pub struct ConfigRegister(u8);
    impl Debug;
    pub u8, t_sb, set_t_sb: 7, 5;
    pub u8, filter, set_filter: 4, 2;
    pub spi3w_en, _: 0;
}

macro_rules! byte_register {
    ( $($t:ty),* ) => {
        $(
            impl From<u8> for $t {
                fn from(value: u8) -> Self {
                    Self(value)
                }
            }

            impl From<$t> for u8 {
                fn from(value: $t) -> u8 {
                    value.0
                }
            }
        )*
    }
}

byte_register!(StatusRegister, CtrlMeas, ConfigRegister);
