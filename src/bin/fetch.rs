use clap::Parser;
use tracing::error;

use valvelink::config::{Config, DEFAULT_CONFIG_PATH};
use valvelink::HttpCsvSource;

/// Fetches the latest reading from one or more logbook endpoints, and prints
/// it as CSV. Useful for checking that a transmitter is reachable before
/// pointing the supervisor at it.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Endpoints to fetch. Defaults to the configured logger endpoints.
    endpoints: Vec<String>,

    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: std::path::PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    let source = match HttpCsvSource::new(&config.source) {
        Ok(source) => source,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    let endpoints = if args.endpoints.is_empty() {
        config.logger.endpoints
    } else {
        args.endpoints
    };

    let mut failed = false;
    for endpoint in &endpoints {
        match source.try_fetch(endpoint) {
            Ok(reading) => println!(
                "{endpoint},{},{},{}",
                reading.sensor_type, reading.value, reading.unit
            ),
            Err(e) => {
                eprintln!("{endpoint}: {e}");
                failed = true;
            }
        }
    }
    if failed {
        std::process::exit(1);
    }
}
