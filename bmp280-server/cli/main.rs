use std::path::PathBuf;

use anyhow::{anyhow, Context};
use bmp280_rdk::common::{compensation::compensate, log::initialize_logger};
use bmp280_rdk::native::sysfs::{Attribute, AttributeDir};
use clap::{Parser, Subcommand};

/// Reads and configures a bmp280 through its attribute directory.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[arg(long = "dir", default_value = "/tmp/bmp280/1-0076")]
    dir: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the calibrated temperature
    GetTemp,
    /// Print the raw reading, calibration and configuration
    Show,
    /// Write a configuration attribute for the driver to apply
    Set { attribute: Attribute, value: String },
}

const SHOWN: [Attribute; 10] = [
    Attribute::RawTemp,
    Attribute::DigT1,
    Attribute::DigT2,
    Attribute::DigT3,
    Attribute::Oversampling,
    Attribute::FilterCoeff,
    Attribute::StandbyTime,
    Attribute::PowerMode,
    Attribute::PollSeq,
    Attribute::Status,
];

fn main() -> anyhow::Result<()> {
    initialize_logger::<env_logger::Logger>();
    let cli = Cli::parse();
    let dir = AttributeDir::open(&cli.dir)
        .with_context(|| format!("no bmp280 attributes in {}", cli.dir.display()))?;

    match cli.command {
        Commands::GetTemp => {
            let calibration = dir.read_calibration()?;
            let raw = dir
                .read_raw_temperature()?
                .ok_or_else(|| anyhow!("the driver has no reading yet"))?;
            println!("Temp: {}", compensate(raw, &calibration));
        }
        Commands::Show => {
            for attribute in SHOWN {
                print!("{:<14}{}", attribute.file_name(), dir.read_value(attribute)?);
                match dir.pending_request(attribute)? {
                    Some(requested) => println!(" (requested {})", requested),
                    None => println!(),
                }
            }
        }
        Commands::Set { attribute, value } => {
            dir.request_write(attribute, &value)?;
            let requested = dir.pending_request(attribute)?.unwrap_or_default();
            println!("{} = {} requested", attribute, requested);
        }
    }
    Ok(())
}
