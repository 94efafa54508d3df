//! Byte-level register access over a two-phase transport: select the register
//! with a one byte write, then transfer.
//!
//! No operation retries; retry policy belongs to callers.

use std::fmt;

use thiserror::Error;

use super::i2c::{I2CErrors, I2CHandle};
use super::registers::Register;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusOperation {
    Select,
    Read,
    Write,
    Burst,
}

impl fmt::Display for BusOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(
            match self {
                Self::Select => "select",
                Self::Read => "read",
                Self::Write => "write",
                Self::Burst => "burst read",
            },
            f,
        )
    }
}

#[derive(Error, Debug)]
pub enum BusErrorKind {
    #[error(transparent)]
    Transport(#[from] I2CErrors),
    #[error("short transfer, expected {expected} bytes got {actual}")]
    ShortTransfer { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
#[error("{operation} of register {register} failed: {kind}")]
pub struct BusError {
    pub register: Register,
    pub operation: BusOperation,
    #[source]
    pub kind: BusErrorKind,
}

impl BusError {
    fn new(register: Register, operation: BusOperation, kind: impl Into<BusErrorKind>) -> Self {
        Self {
            register,
            operation,
            kind: kind.into(),
        }
    }

    fn short(register: Register, operation: BusOperation, expected: usize, actual: usize) -> Self {
        Self::new(
            register,
            operation,
            BusErrorKind::ShortTransfer { expected, actual },
        )
    }
}

pub struct RegisterProtocol<H> {
    handle: H,
    address: u8,
}

impl<H: I2CHandle> RegisterProtocol<H> {
    pub fn new(handle: H, address: u8) -> Self {
        Self { handle, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut H {
        &mut self.handle
    }

    fn select(&mut self, register: Register) -> Result<(), BusError> {
        let sent = self
            .handle
            .write_i2c(self.address, &[register.addr()])
            .map_err(|err| BusError::new(register, BusOperation::Select, err))?;
        if sent != 1 {
            return Err(BusError::short(register, BusOperation::Select, 1, sent));
        }
        Ok(())
    }

    fn receive(
        &mut self,
        register: Register,
        operation: BusOperation,
        buffer: &mut [u8],
    ) -> Result<(), BusError> {
        let received = self
            .handle
            .read_i2c(self.address, buffer)
            .map_err(|err| BusError::new(register, operation, err))?;
        if received != buffer.len() {
            return Err(BusError::short(
                register,
                operation,
                buffer.len(),
                received,
            ));
        }
        Ok(())
    }

    pub fn read_register(&mut self, register: Register) -> Result<u8, BusError> {
        let mut value = [0u8; 1];
        self.select(register)?;
        self.receive(register, BusOperation::Read, &mut value)?;
        Ok(value[0])
    }

    pub fn write_register(&mut self, register: Register, value: u8) -> Result<(), BusError> {
        let sent = self
            .handle
            .write_i2c(self.address, &[register.addr(), value])
            .map_err(|err| BusError::new(register, BusOperation::Write, err))?;
        if sent != 2 {
            return Err(BusError::short(register, BusOperation::Write, 2, sent));
        }
        Ok(())
    }

    /// Reads `N` contiguous registers in one receive. Anything short of `N`
    /// bytes is an error, never a partial result.
    pub fn read_burst<const N: usize>(&mut self, register: Register) -> Result<[u8; N], BusError> {
        let mut bytes = [0u8; N];
        self.select(register)?;
        self.receive(register, BusOperation::Burst, &mut bytes)?;
        Ok(bytes)
    }

    /// Replaces the bits of `register` selected by `mask` with those of `value`.
    ///
    /// Not atomic against other bus masters; the driver assumes it owns the
    /// transport for the duration of the call.
    pub fn modify_register(
        &mut self,
        register: Register,
        mask: u8,
        value: u8,
    ) -> Result<(), BusError> {
        let current = self.read_register(register)?;
        let modified = (current & !mask) | (value & mask);
        log::trace!(
            "{:#04x} modify {}: {:#04x} -> {:#04x}",
            self.address,
            register,
            current,
            modified
        );
        self.write_register(register, modified)
    }
}

#[cfg(test)]
mod tests {
    use super::{BusErrorKind, BusOperation, RegisterProtocol};
    use crate::common::i2c::{FakeBmp280, I2CFault, I2COp, RecordingI2CHandle};
    use crate::common::registers::{Register, DEFAULT_I2C_ADDRESS};

    fn recording(fault: Option<I2CFault>) -> RecordingI2CHandle<FakeBmp280> {
        let mut handle = RecordingI2CHandle::new(FakeBmp280::new("i2c0".to_string()));
        handle.set_fault(fault);
        handle
    }

    #[test_log::test]
    fn test_read_register_selects_then_receives() {
        let handle = recording(None);
        let ops = handle.ops();
        let mut protocol = RegisterProtocol::new(handle, DEFAULT_I2C_ADDRESS);
        assert_eq!(protocol.read_register(Register::Id).unwrap(), 0x58);
        assert_eq!(
            *ops.lock().unwrap(),
            vec![I2COp::Write(vec![0xD0]), I2COp::Read(1)]
        );
    }

    #[test_log::test]
    fn test_read_register_fails_when_select_fails() {
        let handle = recording(Some(I2CFault::FailWrites));
        let ops = handle.ops();
        let mut protocol = RegisterProtocol::new(handle, DEFAULT_I2C_ADDRESS);
        let err = protocol.read_register(Register::Id).unwrap_err();
        assert_eq!(err.register, Register::Id);
        assert_eq!(err.operation, BusOperation::Select);
        assert_eq!(ops.lock().unwrap().len(), 1);
    }

    #[test_log::test]
    fn test_write_register_is_one_transfer() {
        let handle = recording(None);
        let ops = handle.ops();
        let mut protocol = RegisterProtocol::new(handle, DEFAULT_I2C_ADDRESS);
        protocol.write_register(Register::Config, 0x90).unwrap();
        assert_eq!(*ops.lock().unwrap(), vec![I2COp::Write(vec![0xF5, 0x90])]);
        assert_eq!(protocol.handle().inner().register(Register::Config), 0x90);
    }

    #[test_log::test]
    fn test_burst_rejects_short_transfer() {
        let handle = recording(Some(I2CFault::ShortReads(4)));
        let mut protocol = RegisterProtocol::new(handle, DEFAULT_I2C_ADDRESS);
        let err = protocol.read_burst::<6>(Register::Calib00).unwrap_err();
        assert_eq!(err.operation, BusOperation::Burst);
        assert!(matches!(
            err.kind,
            BusErrorKind::ShortTransfer {
                expected: 6,
                actual: 4
            }
        ));
    }

    #[test_log::test]
    fn test_burst_reads_contiguous_registers() {
        let handle = recording(None);
        let ops = handle.ops();
        let mut protocol = RegisterProtocol::new(handle, DEFAULT_I2C_ADDRESS);
        let bytes = protocol.read_burst::<6>(Register::Calib00).unwrap();
        assert_eq!(bytes, [0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC]);
        assert_eq!(
            *ops.lock().unwrap(),
            vec![I2COp::Write(vec![0x88]), I2COp::Read(6)]
        );
    }

    #[test_log::test]
    fn test_modify_preserves_unmasked_bits() {
        let handle = recording(None);
        let ops = handle.ops();
        let mut protocol = RegisterProtocol::new(handle, DEFAULT_I2C_ADDRESS);
        protocol.write_register(Register::Config, 0b1010_0011).unwrap();
        ops.lock().unwrap().clear();

        protocol
            .modify_register(Register::Config, 0x1C, 0b0001_0000)
            .unwrap();
        assert_eq!(
            protocol.handle().inner().register(Register::Config),
            0b1011_0011
        );
        // one read (select + receive) followed by one write
        assert_eq!(
            *ops.lock().unwrap(),
            vec![
                I2COp::Write(vec![0xF5]),
                I2COp::Read(1),
                I2COp::Write(vec![0xF5, 0b1011_0011]),
            ]
        );
    }

    #[test_log::test]
    fn test_modify_does_not_write_when_read_fails() {
        let handle = recording(Some(I2CFault::FailReads));
        let ops = handle.ops();
        let mut protocol = RegisterProtocol::new(handle, DEFAULT_I2C_ADDRESS);
        let err = protocol
            .modify_register(Register::CtrlMeas, 0x03, 0x01)
            .unwrap_err();
        assert_eq!(err.operation, BusOperation::Read);
        let writes = ops
            .lock()
            .unwrap()
            .iter()
            .filter(|op| matches!(op, I2COp::Write(bytes) if bytes.len() > 1))
            .count();
        assert_eq!(writes, 0);
    }

    #[test_log::test]
    fn test_modify_is_idempotent() {
        let mut protocol = RegisterProtocol::new(
            FakeBmp280::new("i2c0".to_string()),
            DEFAULT_I2C_ADDRESS,
        );
        protocol
            .modify_register(Register::CtrlMeas, 0xE0, 0xA0)
            .unwrap();
        let once = protocol.handle().register(Register::CtrlMeas);
        protocol
            .modify_register(Register::CtrlMeas, 0xE0, 0xA0)
            .unwrap();
        assert_eq!(protocol.handle().register(Register::CtrlMeas), once);
    }
}
