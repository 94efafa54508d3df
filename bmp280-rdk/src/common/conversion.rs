//! Forced-mode measurement handshake.
//!
//! ```text
//! Idle -> ModeTriggered -> Polling -> Reading -> Done
//!   \           \             \          \
//!    +-----------+-------------+----------+-> Failed
//! ```
//!
//! Every bus failure and the status poll budget running out are terminal. The
//! sequencer never retries; whoever drives it decides what happens next.

use std::thread::sleep;
use std::time::Duration;

use super::compensation::RawTemperature;
use super::error::Bmp280Error;
use super::i2c::I2CHandle;
use super::protocol::RegisterProtocol;
use super::registers::{Register, StatusRegister, TEMPERATURE_LEN};
use super::settings::DeviceConfigurator;

pub const DEFAULT_STATUS_POLL_QUANTUM: Duration = Duration::from_millis(10);
pub const DEFAULT_MAX_STATUS_POLLS: u32 = 50;

/// Bounds the status polling loop: at most `max_polls` status reads with
/// `quantum` of sleep between them. No sleep follows the last read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusPolling {
    pub quantum: Duration,
    pub max_polls: u32,
}

impl Default for StatusPolling {
    fn default() -> Self {
        Self {
            quantum: DEFAULT_STATUS_POLL_QUANTUM,
            max_polls: DEFAULT_MAX_STATUS_POLLS,
        }
    }
}

#[derive(Debug)]
pub enum ConversionState {
    Idle,
    ModeTriggered,
    /// `polls` status reads already reported measuring
    Polling { polls: u32 },
    Reading,
    Done(RawTemperature),
    Failed(Bmp280Error),
}

impl ConversionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed(_))
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ModeTriggered => "mode-triggered",
            Self::Polling { .. } => "polling",
            Self::Reading => "reading",
            Self::Done(_) => "done",
            Self::Failed(_) => "failed",
        }
    }
}

pub struct ConversionSequencer<'a, H> {
    protocol: &'a mut RegisterProtocol<H>,
    polling: StatusPolling,
    state: ConversionState,
}

impl<'a, H: I2CHandle> ConversionSequencer<'a, H> {
    pub fn new(protocol: &'a mut RegisterProtocol<H>, polling: StatusPolling) -> Self {
        Self {
            protocol,
            polling,
            state: ConversionState::Idle,
        }
    }

    pub fn state(&self) -> &ConversionState {
        &self.state
    }

    /// Advances one transition. Terminal states are left untouched.
    pub fn step(&mut self) -> &ConversionState {
        let state = std::mem::replace(&mut self.state, ConversionState::Idle);
        let next = match state {
            ConversionState::Idle => match DeviceConfigurator::new(&mut *self.protocol).trigger_forced() {
                Ok(()) => ConversionState::ModeTriggered,
                Err(err) => ConversionState::Failed(err.into()),
            },
            ConversionState::ModeTriggered => ConversionState::Polling { polls: 0 },
            ConversionState::Polling { polls } => self.poll_status(polls),
            ConversionState::Reading => {
                match self
                    .protocol
                    .read_burst::<TEMPERATURE_LEN>(Register::TempMsb)
                {
                    Ok(bytes) => ConversionState::Done(RawTemperature::from_burst(bytes)),
                    Err(err) => ConversionState::Failed(err.into()),
                }
            }
            terminal => terminal,
        };
        log::trace!(
            "{:#04x} conversion -> {}",
            self.protocol.address(),
            next.name()
        );
        self.state = next;
        &self.state
    }

    fn poll_status(&mut self, polls: u32) -> ConversionState {
        if polls >= self.polling.max_polls {
            return ConversionState::Failed(Bmp280Error::ConversionTimeout { polls });
        }
        match self.protocol.read_register(Register::Status) {
            Ok(status) if StatusRegister::from(status).measuring() => {
                let polls = polls + 1;
                if polls >= self.polling.max_polls {
                    return ConversionState::Failed(Bmp280Error::ConversionTimeout { polls });
                }
                sleep(self.polling.quantum);
                ConversionState::Polling { polls }
            }
            Ok(_) => ConversionState::Reading,
            Err(err) => ConversionState::Failed(err.into()),
        }
    }

    /// Drives the handshake to a terminal state.
    pub fn run(mut self) -> Result<RawTemperature, Bmp280Error> {
        while !self.state.is_terminal() {
            self.step();
        }
        match self.state {
            ConversionState::Done(raw) => Ok(raw),
            ConversionState::Failed(err) => Err(err),
            _ => unreachable!(),
        }
    }
}
