use crate::common::log::LogAdapter;

impl LogAdapter for env_logger::Logger {
    fn before_log_setup(&self) {}
    fn get_level_filter(&self) -> ::log::LevelFilter {
        self.filter()
    }
    fn new() -> Self {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
            .build()
    }
}
