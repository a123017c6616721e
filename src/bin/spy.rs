use clap::Parser;
use tracing::error;

use valvelink::config::SerialConfig;
use valvelink::protocol::{classify_line, SerialEvent};
use valvelink::serial::resolve_device;
use valvelink::{Error, SerialChannel};

/// Dumps the valve controller's serial output, marking the lines we recognise.
/// Nothing is ever written to the port.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Serial device, defaults to the first available one.
    port: Option<String>,

    #[arg(long, default_value_t = SerialConfig::default().baud_rate)]
    baud: u32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    let args = Args::parse();

    let config = SerialConfig {
        port: args.port,
        baud_rate: args.baud,
        ..SerialConfig::default()
    };
    let channel = match resolve_device(config.port.as_deref()).and_then(|path| {
        SerialChannel::open(&path, &config)
            .map_err(|e| Error::DeviceUnavailable(format!("unable to open {path}: {e}")))
    }) {
        Ok(channel) => channel,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    eprintln!("valvelink spy (v{}): {}", env!("CARGO_PKG_VERSION"), channel.name());

    loop {
        match channel.read_line() {
            Ok(Some(line)) if !line.is_empty() => match classify_line(&line) {
                SerialEvent::ValveTargetPosition(line) => println!("[target]   {line}"),
                SerialEvent::ValvePosition(line) => println!("[position] {line}"),
                SerialEvent::RawLine(line) => println!("           {line}"),
            },
            Ok(_) => (),
            Err(e) => {
                error!("{e}");
                std::process::exit(1);
            }
        }
    }
}
