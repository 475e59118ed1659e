use crate::workbook::CellValue;
use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Days between the spreadsheet serial epoch and 1970-01-01.
pub const SERIAL_EPOCH_OFFSET_DAYS: f64 = 25569.0;

const SECONDS_PER_DAY: f64 = 86400.0;

const DATE_FORMATS: [&str; 6] = [
    "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d %B %Y", "%B %d, %Y", "%b %d, %Y",
];

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Converts a cell into a canonical `YYYY-MM-DD` string, or an empty string
/// when the cell holds nothing recognisable as a date. Never fails.
pub fn normalize_date(value: &CellValue) -> String {
    parse_date(value)
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

pub fn parse_date(value: &CellValue) -> Option<NaiveDate> {
    match value {
        CellValue::Number(serial) => from_serial(*serial),
        CellValue::Text(text) => parse_date_text(text),
        CellValue::Bool(_) | CellValue::Empty => None,
    }
}

/// Spreadsheet day serial to calendar date. Zero counts as "no date".
pub fn from_serial(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial == 0.0 {
        return None;
    }
    let seconds = ((serial - SERIAL_EPOCH_OFFSET_DAYS) * SECONDS_PER_DAY).floor();
    if seconds.abs() > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp(seconds as i64, 0).map(|dt| dt.date_naive())
}

pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc().date());
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}
