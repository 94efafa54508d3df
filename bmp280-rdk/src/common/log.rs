use std::sync::{Mutex, OnceLock};

use ringbuf::{HeapRb, Rb};

// warnings and errors only, enough for the attribute directory's `log` file
const RECENT_LOG_CAPACITY: usize = 32;

type LogBufferType = HeapRb<String>;

fn get_log_buffer() -> &'static Mutex<LogBufferType> {
    static LOG_BUFFER: OnceLock<Mutex<LogBufferType>> = OnceLock::new();
    LOG_BUFFER.get_or_init(|| Mutex::new(HeapRb::new(RECENT_LOG_CAPACITY)))
}

fn format_record(record: &::log::Record) -> String {
    format!("{} {}: {}", record.level(), record.target(), record.args())
}

pub(crate) fn record_line(line: String) {
    if let Ok(mut buffer) = get_log_buffer().lock() {
        buffer.push_overwrite(line);
    }
}

/// Most recent warning and error lines, oldest first.
pub fn recent_log_lines() -> Vec<String> {
    match get_log_buffer().lock() {
        Ok(buffer) => buffer.iter().cloned().collect(),
        Err(_) => vec![],
    }
}

pub trait LogAdapter {
    fn before_log_setup(&self);
    fn get_level_filter(&self) -> ::log::LevelFilter;
    fn new() -> Self;
}

// RecentLogger wraps an existing logger and keeps a copy of every warning
// and error in LOG_BUFFER. The existing logger should satisfy log::Log and
// the LogAdapter trait and is installed with this function at the start of main
pub fn initialize_logger<T: ::log::Log + LogAdapter + 'static>() {
    let inner = T::new();
    let logger = RecentLogger::new(inner);
    let filter = logger.level_filter();
    logger.before_log_setup();
    let _ = ::log::set_boxed_logger(Box::new(logger));
    ::log::set_max_level(filter)
}

struct RecentLogger<L>(L);

impl<L> RecentLogger<L>
where
    L: ::log::Log + LogAdapter,
{
    fn new(inner: L) -> Self {
        Self(inner)
    }

    fn before_log_setup(&self) {
        self.0.before_log_setup()
    }

    fn level_filter(&self) -> ::log::LevelFilter {
        self.0.get_level_filter()
    }
}

impl<L> ::log::Log for RecentLogger<L>
where
    L: ::log::Log + LogAdapter,
{
    fn enabled(&self, metadata: &::log::Metadata) -> bool {
        self.0.enabled(metadata)
    }

    fn flush(&self) {
        self.0.flush()
    }

    fn log(&self, record: &::log::Record) {
        if self.enabled(record.metadata()) {
            self.0.log(record);
            if record.level() <= ::log::Level::Warn {
                record_line(format_record(record));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{format_record, get_log_buffer, record_line, recent_log_lines, RECENT_LOG_CAPACITY};
    use ringbuf::Rb;

    #[test_log::test]
    fn test_buffer_keeps_latest_lines() {
        for i in 0..(RECENT_LOG_CAPACITY + 5) {
            record_line(format!("line {i}"));
        }
        let lines = recent_log_lines();
        assert_eq!(lines.len(), RECENT_LOG_CAPACITY);
        assert_eq!(
            lines.last().map(String::as_str),
            Some(format!("line {}", RECENT_LOG_CAPACITY + 4).as_str())
        );
        get_log_buffer().lock().unwrap().clear();
    }

    #[test_log::test]
    fn test_format_record() {
        let line = format_record(
            &::log::Record::builder()
                .level(::log::Level::Warn)
                .target("bmp280")
                .args(format_args!("conversion failed"))
                .build(),
        );
        assert_eq!(line, "WARN bmp280: conversion failed");
    }
}
