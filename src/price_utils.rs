use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::convert::Infallible;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Integer timestamps at or above this magnitude are epoch milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

const NAIVE_DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// A CSV column picked by zero-based index or by header name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSelector {
    Index(usize),
    Name(String),
}

impl FromStr for ColumnSelector {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(match s.parse::<usize>() {
            Ok(index) => ColumnSelector::Index(index),
            Err(_) => ColumnSelector::Name(s.to_string()),
        })
    }
}

impl fmt::Display for ColumnSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnSelector::Index(index) => write!(f, "{}", index),
            ColumnSelector::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Prices read from a file, with one timestamp per price when a time column
/// was requested.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PriceSeries {
    pub prices: Vec<f64>,
    pub timestamps: Option<Vec<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    price: usize,
    time: Option<usize>,
}

/// Reads a price series from a CSV or one-value-per-line file.
pub fn load_price_series(
    path: &Path,
    price_column: &ColumnSelector,
    time_column: Option<&ColumnSelector>,
) -> Result<PriceSeries> {
    let file = File::open(path)
        .with_context(|| format!("failed to open price file {}", path.display()))?;
    read_price_series(file, price_column, time_column)
        .with_context(|| format!("failed to parse price file {}", path.display()))
}

/// Parses CSV price data.
///
/// Lines starting with `#` are comments. The first row is a header when a
/// column is selected by name or when its price field is not a number; any
/// later non-numeric price is an error. Rows may have differing widths as
/// long as the selected columns are present.
pub fn read_price_series<R: Read>(
    input: R,
    price_column: &ColumnSelector,
    time_column: Option<&ColumnSelector>,
) -> Result<PriceSeries> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .from_reader(input);

    let mut columns: Option<Columns> = None;
    let mut prices = Vec::new();
    let mut timestamps = time_column.map(|_| Vec::new());

    for record in reader.records() {
        let record = record.context("malformed CSV record")?;
        if record.iter().all(str::is_empty) {
            continue;
        }

        let cols = match columns {
            Some(cols) => cols,
            None => {
                let header = is_header_row(&record, price_column);
                let header_row = header.then_some(&record);
                let cols = Columns {
                    price: resolve_column(price_column, header_row)?,
                    time: time_column
                        .map(|selector| resolve_column(selector, header_row))
                        .transpose()?,
                };
                columns = Some(cols);
                if header {
                    continue;
                }
                cols
            }
        };

        let line = line_number(&record);
        prices.push(parse_price_field(&record, cols.price, line)?);
        if let (Some(timestamps), Some(column)) = (timestamps.as_mut(), cols.time) {
            timestamps.push(parse_timestamp_field(&record, column, line)?);
        }
    }

    Ok(PriceSeries { prices, timestamps })
}

/// Parses RFC 3339, `YYYY-MM-DD[ HH:MM[:SS]]` (taken as UTC) or integer epoch
/// seconds / milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive));
    }

    let epoch = raw.parse::<i64>().ok()?;
    if epoch.abs() >= EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(epoch).single()
    } else {
        Utc.timestamp_opt(epoch, 0).single()
    }
}

fn is_header_row(record: &StringRecord, price_column: &ColumnSelector) -> bool {
    match price_column {
        ColumnSelector::Name(_) => true,
        ColumnSelector::Index(index) => record
            .get(*index)
            .map_or(false, |field| field.parse::<f64>().is_err()),
    }
}

fn resolve_column(selector: &ColumnSelector, header: Option<&StringRecord>) -> Result<usize> {
    match selector {
        ColumnSelector::Index(index) => Ok(*index),
        ColumnSelector::Name(name) => {
            let header = header.ok_or_else(|| {
                anyhow!("column {} is selected by name but the file has no header row", name)
            })?;
            header
                .iter()
                .position(|field| field.eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    anyhow!(
                        "header has no column {} (value: {})",
                        name,
                        join_fields(header)
                    )
                })
        }
    }
}

fn parse_price_field(record: &StringRecord, column: usize, line: u64) -> Result<f64> {
    let field = selected_field(record, column, line)?;
    field
        .parse::<f64>()
        .map_err(|_| anyhow!("line {} is not a number (value: {})", line, field))
}

fn parse_timestamp_field(record: &StringRecord, column: usize, line: u64) -> Result<DateTime<Utc>> {
    let field = selected_field(record, column, line)?;
    parse_timestamp(field)
        .ok_or_else(|| anyhow!("line {} has an unreadable timestamp (value: {})", line, field))
}

fn selected_field(record: &StringRecord, column: usize, line: u64) -> Result<&str> {
    record.get(column).ok_or_else(|| {
        anyhow!(
            "line {} has no column {} (value: {})",
            line,
            column,
            join_fields(record)
        )
    })
}

fn line_number(record: &StringRecord) -> u64 {
    record.position().map_or(0, |position| position.line())
}

fn join_fields(record: &StringRecord) -> String {
    record.iter().collect::<Vec<_>>().join(",")
}
