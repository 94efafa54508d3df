//! Host plumbing for running the driver on a regular operating system.

pub mod log;
pub mod sysfs;
