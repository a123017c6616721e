//! Configuration, loaded from a TOML file. Every field has a default so that
//! an empty (or missing) file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::Error;

pub const DEFAULT_CONFIG_PATH: &str = "valvelink.toml";

/// Upper bound for every interval and timeout, in seconds (one day).
pub const MAX_INTERVAL_SECS: f64 = 24.0 * 60.0 * 60.0;

/// The two logbooks exported by the transmitter used in the original
/// deployment (temperature and pH respectively).
pub const DEFAULT_LOGBOOK_ENDPOINTS: [&str; 2] = [
    "http://192.168.1.212/userfiles/Data0_logbook.csv",
    "http://192.168.1.212/userfiles/Data1_logbook.csv",
];

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub poller: PollerConfig,
    pub reader: ReaderConfig,
    pub logger: LoggerConfig,
    pub source: SourceConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path (e.g. /dev/ttyACM0 or COM3). If unset, the first port that
    /// the OS reports is used.
    pub port: Option<String>,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            read_timeout_ms: 1000,
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub endpoint: Option<String>,
    pub interval_secs: f64,
    /// Readings are divided by this before being sent to the controller.
    pub value_divisor: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            endpoint: Some(DEFAULT_LOGBOOK_ENDPOINTS[0].to_string()),
            interval_secs: 6.0,
            value_divisor: 1.0,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub poll_interval_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

impl ReaderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub endpoints: Vec<String>,
    pub interval_secs: f64,
    /// Directory that <sensor_type>.csv files are written to.
    pub directory: PathBuf,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_LOGBOOK_ENDPOINTS
                .iter()
                .map(|endpoint| endpoint.to_string())
                .collect(),
            interval_secs: 30.0,
            directory: PathBuf::from("."),
        }
    }
}

impl LoggerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub fetch_timeout_secs: f64,
    pub delimiter: char,
    /// Number of preamble lines preceding the logbook's header row.
    pub skip_rows: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 10.0,
            delimiter: ';',
            skip_rows: 2,
        }
    }
}

impl SourceConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.fetch_timeout_secs)
    }
}

impl Config {
    /// Loads the configuration at path. A missing file is not an error (we
    /// fall back to defaults), but a file that exists and can't be parsed is:
    /// silently ignoring a typo'd interval seems worse than refusing to start.
    pub fn load(path: &Path) -> Result<Config, Error> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("{} not found, using default configuration", path.display());
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "unable to read {}: {e}",
                    path.display()
                )))
            }
        };
        let config = Config::parse(&contents)?;
        debug!("loaded configuration from {}: {config:?}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Config, Error> {
        let config: Config = toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), Error> {
        // Duration::from_secs_f64 panics on input it can't represent, and
        // tasks add intervals to Instants, so this has to be checked before
        // anyone asks for an interval.
        for (name, value) in [
            ("poller.interval_secs", self.poller.interval_secs),
            ("logger.interval_secs", self.logger.interval_secs),
            ("source.fetch_timeout_secs", self.source.fetch_timeout_secs),
        ] {
            let valid = value > 0.0
                && value <= MAX_INTERVAL_SECS
                && Duration::try_from_secs_f64(value).is_ok();
            if !valid {
                return Err(Error::Config(format!(
                    "{name} must be between 0 and {MAX_INTERVAL_SECS} seconds (got {value})"
                )));
            }
        }
        if !self.poller.value_divisor.is_finite() || self.poller.value_divisor == 0.0 {
            return Err(Error::Config(format!(
                "poller.value_divisor must be non-zero (got {})",
                self.poller.value_divisor
            )));
        }
        if self.reader.poll_interval_ms == 0
            || self.reader.poll_interval_ms as f64 > MAX_INTERVAL_SECS * 1000.0
        {
            return Err(Error::Config(format!(
                "reader.poll_interval_ms must be between 1 and {}",
                MAX_INTERVAL_SECS * 1000.0
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(Config::parse(""), Ok(Config::default()));
    }

    #[test]
    fn test_partial_config() {
        let config = Config::parse(
            r#"
[serial]
port = "/dev/ttyACM0"

[poller]
value_divisor = 10.0

[logger]
endpoints = ["http://localhost/a.csv"]
interval_secs = 600
"#,
        )
        .unwrap();
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.poller.value_divisor, 10.0);
        assert_eq!(config.poller.interval(), Duration::from_secs(6));
        assert_eq!(config.logger.endpoints, vec!["http://localhost/a.csv"]);
        assert_eq!(config.logger.interval(), Duration::from_secs(600));
        assert_eq!(config.source.delimiter, ';');
    }

    #[test]
    fn test_invalid_configs() {
        struct TestCase<'a> {
            name: &'a str,
            input: &'a str,
        }
        let tests = [
            TestCase {
                name: "ZeroInterval",
                input: "[poller]\ninterval_secs = 0",
            },
            TestCase {
                name: "NegativeInterval",
                input: "[logger]\ninterval_secs = -30",
            },
            TestCase {
                name: "Overflow",
                input: "[poller]\ninterval_secs = 1e20",
            },
            TestCase {
                name: "OverflowsInstant",
                input: "[logger]\ninterval_secs = 1e18",
            },
            TestCase {
                name: "TimeoutOverflow",
                input: "[source]\nfetch_timeout_secs = 1e20",
            },
            TestCase {
                name: "NaNInterval",
                input: "[poller]\ninterval_secs = nan",
            },
            TestCase {
                name: "InfiniteTimeout",
                input: "[source]\nfetch_timeout_secs = inf",
            },
            TestCase {
                name: "HugeReaderPoll",
                input: "[reader]\npoll_interval_ms = 9223372036854775807",
            },
            TestCase {
                name: "ZeroDivisor",
                input: "[poller]\nvalue_divisor = 0.0",
            },
            TestCase {
                name: "ZeroReaderPoll",
                input: "[reader]\npoll_interval_ms = 0",
            },
            TestCase {
                name: "WrongType",
                input: "[serial]\nbaud_rate = \"fast\"",
            },
        ];
        for case in tests {
            assert!(
                matches!(Config::parse(case.input), Err(Error::Config(_))),
                "{}: expected config error",
                case.name
            );
        }
    }

    #[test]
    fn test_longest_interval_accepted() {
        let config = Config::parse("[logger]\ninterval_secs = 86400").unwrap();
        assert_eq!(config.logger.interval(), Duration::from_secs(86400));
    }

    #[test]
    fn test_round_trip_defaults() {
        let serialised = Config::default().to_toml().unwrap();
        assert_eq!(Config::parse(&serialised), Ok(Config::default()));
    }

    #[test]
    fn test_missing_file_is_default() {
        let path = std::env::temp_dir().join(format!(
            "valvelink-missing-{}.toml",
            std::process::id()
        ));
        assert_eq!(Config::load(&path), Ok(Config::default()));
    }
}
