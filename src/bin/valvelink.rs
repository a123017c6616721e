use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use valvelink::config::DEFAULT_CONFIG_PATH;
use valvelink::serial::available_devices;
use valvelink::{Config, EventSink, HttpCsvSource, Notification, SerialEvent, Supervisor};

/// Headless valve controller supervisor. Lines typed on stdin are sent to the
/// controller verbatim, except for:
///   /poll start|stop, /log start|stop, /sweep, /quit
#[derive(Parser, Debug)]
#[command(version, verbatim_doc_comment)]
struct Args {
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial device, overrides the config file.
    #[arg(short, long)]
    port: Option<String>,

    /// List available serial devices and exit.
    #[arg(long)]
    list: bool,

    #[arg(long)]
    baud: Option<u32>,

    /// Reading source endpoint used for polling.
    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Reading values are divided by this before being sent.
    #[arg(long)]
    divisor: Option<f64>,

    /// Start polling immediately.
    #[arg(long)]
    poll: bool,

    /// Start logging immediately.
    #[arg(long)]
    log: bool,
}

enum Input {
    Line(String),
    Quit,
}

fn print_notification(notification: &Notification) {
    match notification {
        Notification::Reading(reading) => {
            println!("{}: {} {}", reading.sensor_type, reading.value, reading.unit)
        }
        Notification::Serial(SerialEvent::ValveTargetPosition(line))
        | Notification::Serial(SerialEvent::ValvePosition(line)) => println!("* {line}"),
        Notification::Serial(SerialEvent::RawLine(line)) => println!("  {line}"),
        Notification::CommandSent(command) => println!("> {command}"),
        Notification::Logged { path, record } => {
            println!("logged {} {} to {}", record.value, record.unit, path.display())
        }
        // Already logged by the library.
        Notification::TaskStarted(_)
        | Notification::TaskStopped(_)
        | Notification::Error { .. } => (),
    }
}

fn handle_line(supervisor: &Supervisor, line: &str) -> bool {
    let result = match line.split_whitespace().collect::<Vec<_>>().as_slice() {
        [] => Ok(()),
        ["/quit"] => return false,
        ["/poll", "start"] => supervisor.start_polling().map(|_| ()),
        ["/poll", "stop"] => {
            supervisor.stop_polling();
            Ok(())
        }
        ["/log", "start"] => supervisor.start_logging().map(|_| ()),
        ["/log", "stop"] => {
            supervisor.stop_logging();
            Ok(())
        }
        ["/sweep"] => supervisor.force_sweep(),
        [command, ..] if command.starts_with('/') => {
            warn!("unknown command: {line}");
            Ok(())
        }
        _ => supervisor.send_raw(line.trim()),
    };
    if let Err(e) = result {
        error!("{e}");
    }
    true
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    info!("valvelink (v{})", env!("CARGO_PKG_VERSION"));

    if args.list {
        match available_devices() {
            Ok(devices) => devices.iter().for_each(|device| println!("{device}")),
            Err(e) => error!("{e}"),
        }
        return;
    }

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    if args.port.is_some() {
        config.serial.port = args.port;
    }
    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }
    if args.endpoint.is_some() {
        config.poller.endpoint = args.endpoint;
    }
    if let Some(log_dir) = args.log_dir {
        config.logger.directory = log_dir;
    }
    if let Some(divisor) = args.divisor {
        config.poller.value_divisor = divisor;
    }

    let source = match HttpCsvSource::new(&config.source) {
        Ok(source) => source,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    let supervisor = match Supervisor::connect(
        config,
        Arc::new(source),
        EventSink::new(print_notification),
    ) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    info!("connected to {}", supervisor.device_name());

    if args.poll {
        if let Err(e) = supervisor.start_polling() {
            error!("{e}");
        }
    }
    if args.log {
        if let Err(e) = supervisor.start_logging() {
            error!("{e}");
        }
    }

    let (tx_input, rx_input) = mpsc::channel();
    let tx_request_exit = tx_input.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx_request_exit.send(Input::Quit);
    }) {
        warn!("unable to install ctrl-c handler: {e}");
    }
    // Blocked on stdin for the process lifetime, so never joined.
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx_input.send(Input::Line(line)).is_err() {
                return;
            }
        }
        let _ = tx_input.send(Input::Quit);
    });

    for input in rx_input {
        match input {
            Input::Line(line) if handle_line(&supervisor, &line) => (),
            Input::Line(_) | Input::Quit => break,
        }
    }
    supervisor.shutdown();
}
