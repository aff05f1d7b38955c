// ABOUTME: Typed value model bridging MySQL rows and ClickHouse SQL literals
// ABOUTME: Handles lossy coercion to integer/float and lenient timestamp parsing

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt::Write;

/// A single cell value flowing through the pipeline.
///
/// Extracted rows arrive as `Value`s converted from the MySQL wire types,
/// the transformer coerces them into the sink's expected shapes, and the
/// loader renders them as ClickHouse SQL literals.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Convert a raw MySQL value into a pipeline value.
    ///
    /// MySQL TEXT/VARCHAR/DECIMAL all arrive as `Bytes`; invalid UTF-8 is
    /// replaced rather than rejected. TIME values carry no date component and
    /// are kept as `HH:MM:SS` text until the transformer decides what to do
    /// with them.
    pub fn from_mysql(value: mysql_async::Value) -> Value {
        match value {
            mysql_async::Value::NULL => Value::Null,
            mysql_async::Value::Bytes(b) => match String::from_utf8(b) {
                Ok(s) => Value::Text(s),
                Err(e) => Value::Text(String::from_utf8_lossy(e.as_bytes()).into_owned()),
            },
            mysql_async::Value::Int(n) => Value::Int(n),
            mysql_async::Value::UInt(n) => Value::Int(n as i64),
            mysql_async::Value::Float(f) => Value::Float(f as f64),
            mysql_async::Value::Double(d) => Value::Float(d),
            mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => {
                match NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32) {
                    Some(date) => match NaiveTime::from_hms_micro_opt(
                        hour as u32,
                        min as u32,
                        sec as u32,
                        micro,
                    ) {
                        Some(time) => Value::Timestamp(NaiveDateTime::new(date, time)),
                        None => Value::Null,
                    },
                    // MySQL zero-dates (0000-00-00) land here
                    None => Value::Null,
                }
            }
            mysql_async::Value::Time(neg, days, hour, min, sec, _micro) => {
                let total_hours = days * 24 + hour as u32;
                let sign = if neg { "-" } else { "" };
                Value::Text(format!("{}{:02}:{:02}:{:02}", sign, total_hours, min, sec))
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of the value, if it has one without parsing heuristics.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(f) => Some(*f as i64),
            Value::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    /// Coerce into a 64-bit integer. Unparsable or missing values become 0.
    pub fn coerce_int(self) -> Value {
        let n = match &self {
            Value::Int(n) => *n,
            Value::Float(f) => *f as i64,
            Value::Text(s) => {
                let trimmed = s.trim();
                trimmed
                    .parse::<i64>()
                    .ok()
                    .or_else(|| trimmed.parse::<f64>().ok().map(|f| f as i64))
                    .unwrap_or(0)
            }
            Value::Null | Value::Timestamp(_) => 0,
        };
        Value::Int(n)
    }

    /// Coerce into a 64-bit float. Unparsable or missing values become 0.0.
    pub fn coerce_float(self) -> Value {
        let f = match &self {
            Value::Int(n) => *n as f64,
            Value::Float(f) => *f,
            Value::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            Value::Null | Value::Timestamp(_) => 0.0,
        };
        Value::Float(f)
    }

    /// Coerce into a timestamp. Unparsable values become `Null`, never zero or
    /// an empty string; timestamps keep a distinct unknown representation.
    pub fn coerce_timestamp(self) -> Value {
        match self {
            Value::Timestamp(ts) => Value::Timestamp(ts),
            Value::Text(s) => match parse_timestamp(&s) {
                Some(ts) => Value::Timestamp(ts),
                None => Value::Null,
            },
            Value::Null | Value::Int(_) | Value::Float(_) => Value::Null,
        }
    }

    /// Render the value as a ClickHouse SQL literal.
    ///
    /// The `clickhouse` client treats `?` in query text as a bind marker, so
    /// literal question marks must be doubled in addition to normal string
    /// escaping.
    pub fn render_sql(&self, out: &mut String) {
        match self {
            Value::Null => out.push_str("NULL"),
            Value::Int(n) => write!(out, "{n}").unwrap(),
            Value::Float(f) => write!(out, "{f}").unwrap(),
            Value::Text(s) => {
                let escaped = s
                    .replace('\\', "\\\\")
                    .replace('\'', "\\'")
                    .replace('?', "??");
                write!(out, "'{escaped}'").unwrap();
            }
            Value::Timestamp(ts) => {
                write!(out, "'{}'", ts.format("%Y-%m-%dT%H:%M:%S%.6f")).unwrap();
            }
        }
    }
}

/// Lenient multi-format timestamp parser.
///
/// Tries the datetime formats the source is known to emit, then date-only
/// forms (midnight), then a bare time-of-day anchored at the epoch date so a
/// MySQL TIME column still survives into a DateTime sink column.
pub fn parse_timestamp(input: &str) -> Option<NaiveDateTime> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts);
        }
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.naive_utc());
    }

    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date.and_hms_opt(0, 0, 0)?);
        }
    }

    if let Ok(time) = NaiveTime::parse_from_str(s, "%H:%M:%S") {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
        return Some(NaiveDateTime::new(epoch, time));
    }

    None
}
