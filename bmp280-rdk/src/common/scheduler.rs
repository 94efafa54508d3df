//! Periodic re-arming of the conversion cycle.
//!
//! The scheduler is split in two stages. The trigger stage is an async task
//! that only sleeps and waits; it never touches the bus. Every time its timer
//! fires it hands one unit of work to a [DeferredWork] context, which runs the
//! blocking conversion, and then waits for that unit's outcome before arming
//! the timer again. At most one unit is in flight per scheduler. A cycle that
//! finds the worker busy or a conversion already running is skipped, not
//! failed.
//!
//! Cancellation is checked before every sleep and wins over an expired timer.
//! A unit already handed off is always allowed to finish first.

use std::future::Future;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};
use async_io::Timer;
use futures_lite::future;
use thiserror::Error;

use super::error::Bmp280Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("polling stopped after a failed conversion: {0}")]
    Conversion(#[from] Bmp280Error),
    #[error("polling stopped after {attempts} consecutive failures: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Bmp280Error,
    },
    #[error("deferred worker is still busy")]
    WorkerBusy,
    #[error("deferred worker is gone")]
    WorkerGone,
    #[error("cannot start deferred worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

/// What happens after a conversion fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop polling and report the failure.
    #[default]
    Stop,
    /// Try again after `backoff`. With `max_attempts` set, polling stops once
    /// that many consecutive conversions have failed.
    Retry {
        backoff: Duration,
        max_attempts: Option<u32>,
    },
}

/// Single-shot delay, armed again explicitly after every cycle.
pub trait PollTimer {
    type Sleep: Future;
    fn after(&self, duration: Duration) -> Self::Sleep;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AsyncIoTimer;

impl PollTimer for AsyncIoTimer {
    type Sleep = Timer;
    fn after(&self, duration: Duration) -> Self::Sleep {
        Timer::after(duration)
    }
}

pub type WorkUnit = Box<dyn FnOnce() + Send + 'static>;

/// Runs work units on a context other than the caller's.
pub trait DeferredWork {
    fn schedule(&self, work: WorkUnit) -> Result<(), SchedulerError>;
}

/// Dedicated thread fed through a single-slot queue.
pub struct ThreadWorker {
    sender: Option<Sender<WorkUnit>>,
    thread: Option<JoinHandle<()>>,
}

impl ThreadWorker {
    pub fn new(name: &str) -> Result<Self, SchedulerError> {
        let (sender, receiver) = async_channel::bounded::<WorkUnit>(1);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(work) = receiver.recv_blocking() {
                    work();
                }
            })?;
        Ok(Self {
            sender: Some(sender),
            thread: Some(thread),
        })
    }

    /// Stops accepting work and joins the thread once the queued unit ran.
    pub fn shutdown(&mut self) {
        let _ = self.sender.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("deferred worker panicked");
            }
        }
    }
}

impl DeferredWork for ThreadWorker {
    fn schedule(&self, work: WorkUnit) -> Result<(), SchedulerError> {
        let sender = self.sender.as_ref().ok_or(SchedulerError::WorkerGone)?;
        sender.try_send(work).map_err(|err| match err {
            TrySendError::Full(_) => SchedulerError::WorkerBusy,
            TrySendError::Closed(_) => SchedulerError::WorkerGone,
        })
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        self.shutdown()
    }
}

/// Runs every unit immediately on the scheduling context.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineWorker;

impl DeferredWork for InlineWorker {
    fn schedule(&self, work: WorkUnit) -> Result<(), SchedulerError> {
        work();
        Ok(())
    }
}

impl<W: DeferredWork + ?Sized> DeferredWork for Arc<W> {
    fn schedule(&self, work: WorkUnit) -> Result<(), SchedulerError> {
        (**self).schedule(work)
    }
}

/// One blocking poll cycle of a device.
pub trait Pollable: Send + Sync + 'static {
    fn poll_once(&self) -> Result<(), Bmp280Error>;
}

/// Cancels the paired scheduler when cancelled or dropped.
#[derive(Debug)]
pub struct PollHandle {
    cancel: Sender<()>,
}

impl PollHandle {
    pub fn cancel(self) {
        let _ = self.cancel.try_send(());
    }

    /// False once the scheduler has returned.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_closed()
    }
}

pub struct PollScheduler<P, T, W> {
    pollable: Arc<P>,
    interval: Duration,
    policy: FailurePolicy,
    timer: T,
    worker: W,
    cancel: Receiver<()>,
}

impl<P, T, W> PollScheduler<P, T, W>
where
    P: Pollable,
    T: PollTimer,
    W: DeferredWork,
{
    pub fn new(
        pollable: Arc<P>,
        interval: Duration,
        policy: FailurePolicy,
        timer: T,
        worker: W,
    ) -> (Self, PollHandle) {
        let (sender, receiver) = async_channel::bounded(1);
        (
            Self {
                pollable,
                interval,
                policy,
                timer,
                worker,
                cancel: receiver,
            },
            PollHandle { cancel: sender },
        )
    }

    /// Polls until cancelled (`Ok`) or until the failure policy gives up.
    pub async fn run(self) -> Result<(), SchedulerError> {
        log::info!(
            "polling every {:?}, on failure {:?}",
            self.interval,
            self.policy
        );
        let mut delay = self.interval;
        let mut failures = 0;
        let mut cycle: u64 = 0;
        loop {
            let fired = future::or(
                async {
                    let _ = self.cancel.recv().await;
                    false
                },
                async {
                    self.timer.after(delay).await;
                    true
                },
            )
            .await;
            if !fired {
                log::info!("polling cancelled after {} cycles", cycle);
                return Ok(());
            }
            cycle += 1;

            let outcome = match self.dispatch().await {
                Ok(outcome) => outcome,
                Err(SchedulerError::WorkerBusy) => {
                    log::debug!("poll cycle {} skipped, worker busy", cycle);
                    delay = self.interval;
                    continue;
                }
                Err(err) => return Err(err),
            };
            match outcome {
                Ok(()) => {
                    log::debug!("poll cycle {} done", cycle);
                    failures = 0;
                    delay = self.interval;
                }
                Err(Bmp280Error::ConversionInProgress) => {
                    log::debug!("poll cycle {} skipped, conversion in progress", cycle);
                    delay = self.interval;
                }
                Err(err) => match self.policy {
                    FailurePolicy::Stop => {
                        log::error!("poll cycle {} failed, stopping: {}", cycle, err);
                        return Err(SchedulerError::Conversion(err));
                    }
                    FailurePolicy::Retry {
                        backoff,
                        max_attempts,
                    } => {
                        failures += 1;
                        if max_attempts.is_some_and(|max| failures >= max) {
                            log::error!("poll cycle {} failed, giving up: {}", cycle, err);
                            return Err(SchedulerError::RetriesExhausted {
                                attempts: failures,
                                source: err,
                            });
                        }
                        log::warn!(
                            "poll cycle {} failed, retrying in {:?}: {}",
                            cycle,
                            backoff,
                            err
                        );
                        delay = backoff;
                    }
                },
            }
        }
    }

    async fn dispatch(&self) -> Result<Result<(), Bmp280Error>, SchedulerError> {
        let (sender, receiver) = async_channel::bounded(1);
        let pollable = self.pollable.clone();
        self.worker.schedule(Box::new(move || {
            let _ = sender.send_blocking(pollable.poll_once());
        }))?;
        receiver.recv().await.map_err(|_| SchedulerError::WorkerGone)
    }
}
