use std::str::FromStr;

use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::error::Error;
use crate::Reading;

/// Something that can produce the latest reading for an endpoint. Failures
/// are the implementation's problem: they should be logged and turned into
/// None, callers only care whether a reading arrived.
pub trait ReadingSource: Send + Sync {
    fn fetch(&self, endpoint: &str) -> Option<Reading>;
}

pub const SENSOR_TYPE_COLUMN: &str = "Process value";
pub const VALUE_COLUMN: &str = "Measurement value";
pub const UNIT_COLUMN: &str = "Unit";

#[derive(Debug, PartialEq)]
pub enum LogbookError {
    Http(String),
    MissingHeader,
    MissingColumn(&'static str),
    NoData,
    /// A data row with fewer cells than the header requires.
    ShortRow(String),
    InvalidValue(String),
    Tokenise(&'static str),
}

impl std::fmt::Display for LogbookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogbookError::Http(message) => write!(f, "request failed: {message}"),
            LogbookError::MissingHeader => write!(f, "logbook has no header row"),
            LogbookError::MissingColumn(column) => write!(f, "logbook has no '{column}' column"),
            LogbookError::NoData => write!(f, "logbook contains no data rows"),
            LogbookError::ShortRow(row) => write!(f, "logbook row is missing cells: {row}"),
            LogbookError::InvalidValue(value) => {
                write!(f, "unable to parse measurement value '{value}'")
            }
            LogbookError::Tokenise(reason) => write!(f, "malformed logbook row: {reason}"),
        }
    }
}

/// Fetches logbook CSVs over HTTP, as exported by the transmitter's web
/// interface. The format looks like:
///
/// ```text
/// <device name>
/// <export date>
/// Date;Time;Process value;Measurement value;Unit
/// 2024.03.01;12:00:00;Temperature;2.137E+00;degC
/// ```
///
/// Only the most recent (i.e. last) row is of interest.
pub struct HttpCsvSource {
    client: reqwest::blocking::Client,
    delimiter: char,
    skip_rows: usize,
}

impl HttpCsvSource {
    pub fn new(config: &SourceConfig) -> Result<HttpCsvSource, Error> {
        // reqwest has no timeout by default - an unresponsive transmitter
        // would then wedge the polling task indefinitely.
        let client = reqwest::blocking::Client::builder()
            .timeout(config.fetch_timeout())
            .build()
            .map_err(|e| Error::Config(format!("unable to create HTTP client: {e}")))?;
        Ok(HttpCsvSource {
            client,
            delimiter: config.delimiter,
            skip_rows: config.skip_rows,
        })
    }

    pub fn try_fetch(&self, endpoint: &str) -> Result<Reading, LogbookError> {
        let body = self
            .client
            .get(endpoint)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .map_err(|e| LogbookError::Http(e.to_string()))?;
        parse_logbook(&body, self.delimiter, self.skip_rows)
    }
}

impl ReadingSource for HttpCsvSource {
    fn fetch(&self, endpoint: &str) -> Option<Reading> {
        match self.try_fetch(endpoint) {
            Ok(reading) => {
                debug!("fetched from {endpoint}: {reading:?}");
                Some(reading)
            }
            Err(e) => {
                warn!("unable to fetch reading from {endpoint}: {e}");
                None
            }
        }
    }
}

// Much the same approach as a "real" CSV parser, minus everything we don't
// need (multiline cells, configurable quoting, etc.).
fn tokenise_line(line: &str, delimiter: char) -> Result<Vec<String>, LogbookError> {
    #[derive(Clone, Copy)]
    enum LineState {
        Normal,
        InQuote,
    }

    let mut iter = line.chars().peekable();
    let mut out = vec![String::new()];
    let mut state = LineState::Normal;
    while let Some(c) = iter.next() {
        // out is never empty.
        let current_token = out.last_mut().ok_or(LogbookError::Tokenise("empty row"))?;
        match (c, state) {
            (c, LineState::Normal) if c == delimiter => out.push(String::new()),
            ('"', LineState::Normal) => {
                if !current_token.trim().is_empty() {
                    return Err(LogbookError::Tokenise(
                        "quotation marks must start at the beginning of a cell",
                    ));
                }
                current_token.clear();
                state = LineState::InQuote;
            }
            ('"', LineState::InQuote) => match iter.peek() {
                Some('"') => {
                    current_token.push('"');
                    iter.next();
                }
                _ => state = LineState::Normal,
            },
            (c, _) => current_token.push(c),
        }
    }
    if matches!(state, LineState::InQuote) {
        return Err(LogbookError::Tokenise("all quotations must be closed"));
    }
    Ok(out.into_iter().map(|cell| cell.trim().to_string()).collect())
}

fn parse_value(value: &str, delimiter: char) -> Result<f64, LogbookError> {
    if let Ok(value) = f64::from_str(value) {
        return Ok(value);
    }
    // Some locales export decimal commas, which is only unambiguous if
    // commas aren't also the delimiter.
    if delimiter != ',' && value.matches(',').count() == 1 {
        if let Ok(value) = f64::from_str(&value.replace(',', ".")) {
            return Ok(value);
        }
    }
    Err(LogbookError::InvalidValue(value.to_string()))
}

/// Extracts the most recent reading from a logbook export. skip_rows lines
/// of preamble are discarded, the following line must be the header.
pub fn parse_logbook(text: &str, delimiter: char, skip_rows: usize) -> Result<Reading, LogbookError> {
    let mut lines = text.lines().skip(skip_rows);
    let header = tokenise_line(lines.next().ok_or(LogbookError::MissingHeader)?, delimiter)?;
    let column = |name: &'static str| {
        header
            .iter()
            .position(|cell| cell == name)
            .ok_or(LogbookError::MissingColumn(name))
    };
    let sensor_type_col = column(SENSOR_TYPE_COLUMN)?;
    let value_col = column(VALUE_COLUMN)?;
    let unit_col = column(UNIT_COLUMN)?;

    let last_row = lines
        .filter(|line| !line.trim().is_empty())
        .last()
        .ok_or(LogbookError::NoData)?;
    let cells = tokenise_line(last_row, delimiter)?;
    let cell = |index: usize| {
        cells
            .get(index)
            .map(|cell| cell.as_str())
            .ok_or_else(|| LogbookError::ShortRow(last_row.to_string()))
    };

    Ok(Reading {
        sensor_type: cell(sensor_type_col)?.to_string(),
        value: parse_value(cell(value_col)?, delimiter)?,
        unit: cell(unit_col)?.to_string(),
    })
}
