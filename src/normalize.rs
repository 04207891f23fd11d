//! Coercion of raw engine values into [`Value`]
//!
//! Rules are applied in a fixed priority order:
//!
//! 1. error cells become [`Value::Error`] (or fail in [`ErrorMode::Strict`])
//! 2. empty cells, and text that is only whitespace, become the blank substitute
//! 3. date serials and decoded timestamps become dates
//! 4. numbers become `f64`, booleans stay booleans
//! 5. anything else is trimmed text
//!
//! The order matters: a blank cell formatted as a date must not turn into the
//! epoch, and an error must never silently become `0` or `""`.

use crate::error::{Result, TabError};
use crate::types::{CellValue, DateSystem};
use crate::value::Value;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

const MS_PER_DAY: f64 = 86_400_000.0;
/// 9999-12-31 in the 1900 system
const MAX_SERIAL: f64 = 2_958_465.0;

/// How date cells are returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateMode {
    /// Calendar date, time of day dropped
    #[default]
    Date,
    /// Full timestamp
    DateTime,
}

/// What to do with spreadsheet error cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// Embed [`Value::Error`] in the record and keep going
    #[default]
    Lenient,
    /// Fail the extraction with [`TabError::CellError`]
    Strict,
}

/// Options for one extraction
///
/// # Examples
///
/// ```
/// use formtab::normalize::{DateMode, ExtractOptions};
///
/// let options = ExtractOptions::new()
///     .with_empty("N/A")
///     .with_dates(DateMode::DateTime)
///     .strict();
/// assert_eq!(options.empty.as_str(), Some("N/A"));
/// ```
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Substitute for blank cells and `None` placeholders
    pub empty: Value,
    pub dates: DateMode,
    pub errors: ErrorMode,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            empty: Value::nan(),
            dates: DateMode::Date,
            errors: ErrorMode::Lenient,
        }
    }
}

impl ExtractOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the blank substitute (e.g. `"N/A"`, `""` or a number)
    pub fn with_empty(mut self, empty: impl Into<Value>) -> Self {
        self.empty = empty.into();
        self
    }

    pub fn with_dates(mut self, dates: DateMode) -> Self {
        self.dates = dates;
        self
    }

    pub fn with_errors(mut self, errors: ErrorMode) -> Self {
        self.errors = errors;
        self
    }

    /// Shorthand for `with_errors(ErrorMode::Strict)`
    pub fn strict(self) -> Self {
        self.with_errors(ErrorMode::Strict)
    }
}

/// Normalize one raw cell value
pub fn normalize(raw: &CellValue, system: DateSystem, options: &ExtractOptions) -> Result<Value> {
    match raw {
        CellValue::Error(code) => match options.errors {
            ErrorMode::Lenient => Ok(Value::Error(code.clone())),
            ErrorMode::Strict => Err(TabError::CellError { code: code.clone() }),
        },
        CellValue::Empty => Ok(options.empty.clone()),
        CellValue::String(s) if s.trim().is_empty() => Ok(options.empty.clone()),
        CellValue::DateTime(serial) => Ok(match serial_to_datetime(*serial, system) {
            Some(t) => date_value(t, options.dates),
            None => Value::Number(*serial),
        }),
        CellValue::Timestamp(t) => Ok(date_value(*t, options.dates)),
        CellValue::Float(f) => Ok(Value::Number(*f)),
        CellValue::Int(i) => Ok(Value::Number(*i as f64)),
        CellValue::Bool(b) => Ok(Value::Bool(*b)),
        CellValue::String(s) => Ok(Value::Text(s.trim().to_string())),
    }
}

fn date_value(t: NaiveDateTime, mode: DateMode) -> Value {
    match mode {
        DateMode::Date => Value::Date(t.date()),
        DateMode::DateTime => Value::DateTime(t),
    }
}

/// Convert a date serial to a timestamp, rounded to the millisecond
///
/// In the 1900 system serial 60 is the non-existent 1900-02-29; serials below
/// it are shifted by one day so that 1 maps to 1900-01-01 and 61 to 1900-03-01.
pub fn serial_to_datetime(serial: f64, system: DateSystem) -> Option<NaiveDateTime> {
    if !serial.is_finite() || !(0.0..=MAX_SERIAL).contains(&serial) {
        return None;
    }
    let epoch = match system {
        DateSystem::V1900 if serial >= 1.0 && serial < 60.0 => NaiveDate::from_ymd_opt(1899, 12, 31)?,
        DateSystem::V1900 => NaiveDate::from_ymd_opt(1899, 12, 30)?,
        DateSystem::V1904 => NaiveDate::from_ymd_opt(1904, 1, 1)?,
    };
    let days = serial.floor();
    let mut ms = ((serial - days) * MS_PER_DAY).round() as i64;
    let mut days = days as i64;
    if ms >= MS_PER_DAY as i64 {
        days += 1;
        ms = 0;
    }
    epoch
        .and_time(NaiveTime::MIN)
        .checked_add_signed(Duration::days(days))?
        .checked_add_signed(Duration::milliseconds(ms))
}

/// Inverse of [`serial_to_datetime`]; used when writing dates back
///
/// Returns `None` for instants with no serial: anything before the epoch and,
/// in the 1900 system, 1899-12-31. Times on 1899-12-30 give serials below 1,
/// which is how time-only cells are stored.
pub fn datetime_to_serial(t: NaiveDateTime, system: DateSystem) -> Option<f64> {
    let epoch = match system {
        DateSystem::V1900 => NaiveDate::from_ymd_opt(1899, 12, 30)?,
        DateSystem::V1904 => NaiveDate::from_ymd_opt(1904, 1, 1)?,
    };
    let elapsed = t - epoch.and_time(NaiveTime::MIN);
    let mut serial = elapsed.num_milliseconds() as f64 / MS_PER_DAY;
    if serial < 0.0 || serial > MAX_SERIAL + 1.0 {
        return None;
    }
    if system == DateSystem::V1900 && serial < 61.0 {
        match serial {
            s if s < 1.0 => {}
            s if s < 2.0 => return None,
            _ => serial -= 1.0,
        }
    }
    Some(serial)
}
