//! The exec module exposes helpers to execute futures
use async_executor::{LocalExecutor, Task};
use futures_lite::{future::block_on, Future};

#[derive(Clone, Debug, Default)]
/// Local executor bound to the thread that uses it. Poll schedulers and any
/// mirroring tasks of the server run on it, never the blocking conversion.
pub struct Executor {}

std::thread_local! {
    static EX: LocalExecutor<'static> = const { LocalExecutor::new() };
}

impl Executor {
    pub fn new() -> Self {
        Self {}
    }
    // Spawn a future onto the local executor
    pub fn spawn<T: 'static>(&self, future: impl Future<Output = T> + 'static) -> Task<T> {
        EX.with(|e| e.spawn(future))
    }

    pub fn block_on<T>(&self, future: impl Future<Output = T>) -> T {
        EX.with(|e| block_on(e.run(future)))
    }
}
