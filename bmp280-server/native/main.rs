mod native {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use anyhow::Context;
    use async_io::Timer;
    use bmp280_rdk::common::{
        config::Bmp280Config,
        device::Bmp280,
        exec::Executor,
        i2c::{FakeBmp280, I2CHandle},
        log::initialize_logger,
        scheduler::{AsyncIoTimer, PollScheduler, ThreadWorker},
    };
    use bmp280_rdk::native::sysfs::AttributeDir;
    use clap::Parser;
    use futures_lite::future;

    const MIN_MIRROR_PERIOD: Duration = Duration::from_millis(50);

    /// Runs one simulated bmp280, polls it and mirrors its state into an
    /// attribute directory.
    #[derive(Parser, Debug)]
    #[command(version, about)]
    struct Args {
        /// JSON driver configuration. Defaults apply when omitted
        #[arg(long = "config")]
        config: Option<PathBuf>,
        #[arg(long = "attr-dir", default_value = "/tmp/bmp280/1-0076")]
        attr_dir: PathBuf,
        /// Cancel polling after this many seconds
        #[arg(long = "run-for-secs")]
        run_for_secs: Option<u64>,
        /// Status reads the simulated device reports measuring after each trigger
        #[arg(long = "measuring-reads", default_value = "2")]
        measuring_reads: u32,
        /// Raw counts the simulated temperature moves per conversion
        #[arg(long = "drift", default_value = "16")]
        drift: u32,
    }

    fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Bmp280Config> {
        let Some(path) = path else {
            return Ok(Bmp280Config::default());
        };
        let json = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Bmp280Config::from_json(&json)
            .with_context(|| format!("invalid config {}", path.display()))
    }

    // keeps the attribute directory in step with the device on its own
    // executor thread, so file I/O never delays the poll trigger
    fn spawn_mirror<H>(
        device: Arc<Bmp280<H>>,
        dir: AttributeDir,
        period: Duration,
    ) -> anyhow::Result<(async_channel::Sender<()>, thread::JoinHandle<()>)>
    where
        H: I2CHandle + Send + 'static,
    {
        let (stop, stopped) = async_channel::bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("bmp280-mirror".to_string())
            .spawn(move || {
                Executor::new().block_on(async move {
                    loop {
                        let tick = future::or(
                            async {
                                let _ = stopped.recv().await;
                                false
                            },
                            async {
                                Timer::after(period).await;
                                true
                            },
                        )
                        .await;
                        if !tick {
                            break;
                        }
                        if let Err(err) = dir.sync(&*device) {
                            log::error!("attribute sync failed: {}", err);
                        }
                    }
                })
            })?;
        Ok((stop, thread))
    }

    pub(crate) fn main_native() -> anyhow::Result<()> {
        initialize_logger::<env_logger::Logger>();
        let args = Args::parse();
        let config = load_config(args.config.as_ref())?;

        let bus = FakeBmp280::new("i2c-sim".to_string())
            .with_address(config.i2c_address)
            .with_measuring_reads(args.measuring_reads)
            .with_drift(args.drift);
        let device = Arc::new(Bmp280::new(bus, &config).context("bmp280 initialization failed")?);

        let dir = AttributeDir::create(&args.attr_dir)?;
        dir.export(&*device)?;
        log::info!("attributes in {}", dir.root().display());

        let worker = ThreadWorker::new("bmp280-conversion")?;
        let (scheduler, handle) = PollScheduler::new(
            device.clone(),
            config.poll_interval,
            config.failure_policy,
            AsyncIoTimer,
            worker,
        );
        let (stop_mirror, mirror) = spawn_mirror(
            device.clone(),
            dir.clone(),
            (config.poll_interval / 2).max(MIN_MIRROR_PERIOD),
        )?;

        let executor = Executor::new();
        // dropping the handle cancels, so it stays alive unless a deadline owns it
        let mut handle = Some(handle);
        if let Some(secs) = args.run_for_secs {
            let handle = handle.take();
            executor
                .spawn(async move {
                    Timer::after(Duration::from_secs(secs)).await;
                    if let Some(handle) = handle {
                        handle.cancel();
                    }
                })
                .detach();
        }
        let result = executor.block_on(scheduler.run());
        drop(handle);

        let _ = stop_mirror.try_send(());
        if mirror.join().is_err() {
            log::error!("attribute mirror panicked");
        }
        dir.export(&*device)?;
        result.context("polling stopped")
    }
}

fn main() -> anyhow::Result<()> {
    native::main_native()
}
