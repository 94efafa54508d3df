use std::sync::{Arc, Mutex};

use thiserror::Error;

use super::registers::{
    CtrlMeas, Register, StatusRegister, BMP280_CHIP_ID, BMP280_RESET_COMMAND, DEFAULT_I2C_ADDRESS,
};

// Linux errno values reported by the fake transports
const ENXIO: i32 = 6;
const EIO: i32 = 5;

#[derive(Error, Debug)]
pub enum I2CErrors {
    #[error("invalid argument: {0}")]
    I2CInvalidArgument(&'static str),
    #[error("i2c bus {0} read error {1}")]
    I2CReadError(String, i32),
    #[error("i2c bus {0} write error {1}")]
    I2CWriteError(String, i32),
    #[error("{0} unimplemented")]
    I2CUnimplemented(&'static str),
}

/// A blocking byte channel to devices on an I2C bus.
///
/// Reads and writes report how many bytes actually crossed the bus so callers
/// can reject partial transfers.
pub trait I2CHandle {
    fn name(&self) -> String;

    fn read_i2c(&mut self, _address: u8, _buffer: &mut [u8]) -> Result<usize, I2CErrors> {
        Err(I2CErrors::I2CUnimplemented("read_i2c"))
    }

    fn write_i2c(&mut self, _address: u8, _bytes: &[u8]) -> Result<usize, I2CErrors> {
        Err(I2CErrors::I2CUnimplemented("write_i2c"))
    }
}

/// Register-file model of a BMP280 answering on a single bus address.
///
/// A one byte write selects the register pointer, longer writes are
/// `[register, value]` pairs as on the real part. Reads auto-increment the
/// pointer. Writing forced mode into `ctrl_meas` opens a measuring window that
/// lasts for `measuring_reads` status reads, after which the mode bits fall
/// back to sleep and the temperature registers are refreshed.
#[derive(Clone, Debug)]
pub struct FakeBmp280 {
    name: String,
    address: u8,
    registers: [u8; 256],
    pointer: u8,
    raw_temperature: u32,
    drift: u32,
    measuring_reads: u32,
    measuring_remaining: u32,
    nvm_copy_reads: u32,
    nvm_copy_remaining: u32,
    resets: u32,
}

// datasheet example unit: dig_T1 = 27504, dig_T2 = 26435, dig_T3 = -1000
const FAKE_CALIBRATION: [u8; 6] = [0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC];
const FAKE_RAW_TEMPERATURE: u32 = 519888;

impl FakeBmp280 {
    pub fn new(name: String) -> Self {
        let mut fake = FakeBmp280 {
            name,
            address: DEFAULT_I2C_ADDRESS,
            registers: [0; 256],
            pointer: 0,
            raw_temperature: FAKE_RAW_TEMPERATURE,
            drift: 0,
            measuring_reads: 1,
            measuring_remaining: 0,
            nvm_copy_reads: 0,
            nvm_copy_remaining: 0,
            resets: 0,
        };
        fake.registers[Register::Id.addr() as usize] = BMP280_CHIP_ID;
        fake.load_calibration(FAKE_CALIBRATION);
        fake
    }

    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    pub fn with_id(mut self, id: u8) -> Self {
        self.registers[Register::Id.addr() as usize] = id;
        self
    }

    pub fn with_calibration(mut self, bytes: [u8; 6]) -> Self {
        self.load_calibration(bytes);
        self
    }

    /// Value latched into the temperature registers on the next completed conversion.
    pub fn with_raw_temperature(mut self, raw: u32) -> Self {
        self.raw_temperature = raw & 0xF_FFFF;
        self
    }

    /// Raw counts added to the simulated reading after every conversion.
    pub fn with_drift(mut self, drift: u32) -> Self {
        self.drift = drift;
        self
    }

    /// Number of status reads reporting `measuring` after each forced trigger.
    pub fn with_measuring_reads(mut self, reads: u32) -> Self {
        self.measuring_reads = reads;
        self
    }

    /// Number of status reads reporting `im_update` after each reset.
    pub fn with_nvm_copy_reads(mut self, reads: u32) -> Self {
        self.nvm_copy_reads = reads;
        self
    }

    pub fn register(&self, register: Register) -> u8 {
        self.registers[register.addr() as usize]
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }

    fn load_calibration(&mut self, bytes: [u8; 6]) {
        let base = Register::Calib00.addr() as usize;
        self.registers[base..base + bytes.len()].copy_from_slice(&bytes);
    }

    fn latch_temperature(&mut self) {
        let raw = self.raw_temperature;
        self.registers[Register::TempMsb.addr() as usize] = (raw >> 12) as u8;
        self.registers[Register::TempLsb.addr() as usize] = (raw >> 4) as u8;
        self.registers[Register::TempXlsb.addr() as usize] = ((raw & 0x0F) << 4) as u8;
        self.raw_temperature = raw.wrapping_add(self.drift) & 0xF_FFFF;
    }

    fn store(&mut self, register: u8, value: u8) {
        match register {
            r if r == Register::Reset.addr() => {
                if value == BMP280_RESET_COMMAND {
                    self.resets += 1;
                    self.measuring_remaining = 0;
                    self.nvm_copy_remaining = self.nvm_copy_reads;
                    self.registers[Register::CtrlMeas.addr() as usize] = 0;
                    self.registers[Register::Config.addr() as usize] = 0;
                }
            }
            r if r == Register::CtrlMeas.addr() => {
                self.registers[r as usize] = value;
                let mode = CtrlMeas::from(value).mode();
                if mode == 0b01 || mode == 0b10 {
                    self.measuring_remaining = self.measuring_reads;
                    if self.measuring_remaining == 0 {
                        self.finish_conversion();
                    }
                }
            }
            r if r == Register::Config.addr() => self.registers[r as usize] = value,
            // id, calibration and data registers are read-only
            _ => {}
        }
    }

    fn finish_conversion(&mut self) {
        let mut ctrl = CtrlMeas::from(self.registers[Register::CtrlMeas.addr() as usize]);
        ctrl.set_mode(0);
        self.registers[Register::CtrlMeas.addr() as usize] = ctrl.into();
        self.latch_temperature();
    }

    fn load(&mut self, register: u8) -> u8 {
        if register == Register::Status.addr() {
            let measuring = self.measuring_remaining > 0;
            if measuring {
                self.measuring_remaining -= 1;
                if self.measuring_remaining == 0 {
                    self.finish_conversion();
                }
            }
            let im_update = self.nvm_copy_remaining > 0;
            if im_update {
                self.nvm_copy_remaining -= 1;
            }
            return StatusRegister::with_flags(measuring, im_update).into();
        }
        self.registers[register as usize]
    }
}

impl I2CHandle for FakeBmp280 {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn read_i2c(&mut self, address: u8, buffer: &mut [u8]) -> Result<usize, I2CErrors> {
        if address != self.address {
            return Err(I2CErrors::I2CReadError(self.name.clone(), -ENXIO));
        }
        for byte in buffer.iter_mut() {
            *byte = self.load(self.pointer);
            self.pointer = self.pointer.wrapping_add(1);
        }
        Ok(buffer.len())
    }

    fn write_i2c(&mut self, address: u8, bytes: &[u8]) -> Result<usize, I2CErrors> {
        if address != self.address {
            return Err(I2CErrors::I2CWriteError(self.name.clone(), -ENXIO));
        }
        match bytes {
            [] => return Err(I2CErrors::I2CInvalidArgument("empty write")),
            [register] => self.pointer = *register,
            pairs => {
                for pair in pairs.chunks(2) {
                    match pair {
                        [register, value] => self.store(*register, *value),
                        [register] => self.pointer = *register,
                        _ => unreachable!(),
                    }
                }
            }
        }
        Ok(bytes.len())
    }
}

/// One transfer observed by a [RecordingI2CHandle].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum I2COp {
    Write(Vec<u8>),
    Read(usize),
}

/// Fault injected by a [RecordingI2CHandle].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum I2CFault {
    FailReads,
    FailWrites,
    /// every read delivers at most this many bytes
    ShortReads(usize),
    /// the n-th transfer (0 based) and every later one fails
    FailFrom(usize),
}

/// Transport wrapper that records every transfer and can inject faults.
///
/// The log is shared so tests can keep a view after the handle has been
/// moved into a driver.
#[derive(Clone, Debug)]
pub struct RecordingI2CHandle<H> {
    inner: H,
    ops: Arc<Mutex<Vec<I2COp>>>,
    fault: Option<I2CFault>,
}

impl<H: I2CHandle> RecordingI2CHandle<H> {
    pub fn new(inner: H) -> Self {
        Self {
            inner,
            ops: Arc::new(Mutex::new(Vec::new())),
            fault: None,
        }
    }

    pub fn with_fault(mut self, fault: I2CFault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn set_fault(&mut self, fault: Option<I2CFault>) {
        self.fault = fault;
    }

    pub fn ops(&self) -> Arc<Mutex<Vec<I2COp>>> {
        self.ops.clone()
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }

    fn record(&self, op: I2COp) -> usize {
        let mut ops = self.ops.lock().unwrap();
        ops.push(op);
        ops.len() - 1
    }

    fn failing_from(&self, index: usize) -> bool {
        matches!(self.fault, Some(I2CFault::FailFrom(n)) if index >= n)
    }
}

impl<H: I2CHandle> I2CHandle for RecordingI2CHandle<H> {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn read_i2c(&mut self, address: u8, buffer: &mut [u8]) -> Result<usize, I2CErrors> {
        let index = self.record(I2COp::Read(buffer.len()));
        if self.fault == Some(I2CFault::FailReads) || self.failing_from(index) {
            return Err(I2CErrors::I2CReadError(self.name(), -EIO));
        }
        match self.fault {
            Some(I2CFault::ShortReads(limit)) if limit < buffer.len() => {
                self.inner.read_i2c(address, &mut buffer[..limit])
            }
            _ => self.inner.read_i2c(address, buffer),
        }
    }

    fn write_i2c(&mut self, address: u8, bytes: &[u8]) -> Result<usize, I2CErrors> {
        let index = self.record(I2COp::Write(bytes.to_vec()));
        if self.fault == Some(I2CFault::FailWrites) || self.failing_from(index) {
            return Err(I2CErrors::I2CWriteError(self.name(), -EIO));
        }
        self.inner.write_i2c(address, bytes)
    }
}
