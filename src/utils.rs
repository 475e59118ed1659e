use crate::error::{IntakeError, Result};
use chrono::{Datelike, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const MONTH_LABELS: [&str; 12] = [
    "Ene", "Feb", "Mar", "Abr", "May", "Jun", "Jul", "Ago", "Sep", "Oct", "Nov", "Dic",
];

pub fn first_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// A single calendar month. Aggregations take one of these explicitly
/// instead of reading any "currently selected month".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub struct MonthWindow {
    pub year: i32,
    pub month: u32,
}

impl MonthWindow {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(IntakeError::InvalidPeriod(format!(
                "month {} must be between 1 and 12",
                month
            )));
        }
        Ok(Self { year, month })
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn start(&self) -> NaiveDate {
        first_day_of_month(self.year, self.month).unwrap_or(NaiveDate::MIN)
    }

    pub fn end(&self) -> NaiveDate {
        last_day_of_month(self.year, self.month).unwrap_or(NaiveDate::MAX)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start() && date <= self.end()
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn label(&self) -> &'static str {
        MONTH_LABELS[(self.month as usize).saturating_sub(1) % 12]
    }
}

/// An inclusive run of calendar months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Period {
    pub first: MonthWindow,
    pub last: MonthWindow,
}

impl Period {
    pub fn month(window: MonthWindow) -> Self {
        Self {
            first: window,
            last: window,
        }
    }

    pub fn quarter(year: i32, quarter: u32) -> Result<Self> {
        if !(1..=4).contains(&quarter) {
            return Err(IntakeError::InvalidPeriod(format!(
                "quarter {} must be between 1 and 4",
                quarter
            )));
        }
        let first_month = (quarter - 1) * 3 + 1;
        Ok(Self {
            first: MonthWindow::new(year, first_month)?,
            last: MonthWindow::new(year, first_month + 2)?,
        })
    }

    pub fn year(year: i32) -> Self {
        Self {
            first: MonthWindow { year, month: 1 },
            last: MonthWindow { year, month: 12 },
        }
    }

    /// Parses "YYYY-MM" or "YYYY-MM:YYYY-MM".
    pub fn parse(period: &str) -> Result<Self> {
        let (start, end) = parse_period_string(period)?;
        if end < start {
            return Err(IntakeError::InvalidPeriod(format!(
                "period '{}' ends before it starts",
                period
            )));
        }
        Ok(Self {
            first: MonthWindow::containing(start),
            last: MonthWindow::containing(end),
        })
    }

    pub fn start(&self) -> NaiveDate {
        self.first.start()
    }

    pub fn end(&self) -> NaiveDate {
        self.last.end()
    }

    pub fn months(&self) -> Vec<MonthWindow> {
        let mut months = Vec::new();
        let mut current = self.first;
        while current <= self.last {
            months.push(current);
            current = current.next();
        }
        months
    }
}

/// Parses a period string in the format "YYYY-MM" or "YYYY-MM:YYYY-MM"
/// Returns (start_date, end_date)
pub fn parse_period_string(period: &str) -> Result<(NaiveDate, NaiveDate)> {
    let parts: Vec<&str> = period.split(':').collect();

    let parse_month_start = |part: &str| -> Result<NaiveDate> {
        let start_str = format!("{}-01", part.trim());
        NaiveDate::parse_from_str(&start_str, "%Y-%m-%d").map_err(|_| {
            IntakeError::InvalidPeriod(format!(
                "Invalid date format in period: {}. Expected YYYY-MM",
                part
            ))
        })
    };

    let month_end = |date: NaiveDate| -> Result<NaiveDate> {
        last_day_of_month(date.year(), date.month()).ok_or_else(|| {
            IntakeError::InvalidPeriod(format!("No month end for {}", date))
        })
    };

    match parts.len() {
        1 => {
            let start_date = parse_month_start(parts[0])?;
            Ok((start_date, month_end(start_date)?))
        }
        2 => {
            let start_date = parse_month_start(parts[0])?;
            let end_ref = parse_month_start(parts[1])?;
            Ok((start_date, month_end(end_ref)?))
        }
        _ => Err(IntakeError::InvalidPeriod(format!(
            "Invalid period format: {}. Expected 'YYYY-MM' or 'YYYY-MM:YYYY-MM'",
            period
        ))),
    }
}

/// Division that resolves to 0 whenever the denominator is zero or the
/// result would not be finite.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        return 0.0;
    }
    let ratio = numerator / denominator;
    if ratio.is_finite() {
        ratio
    } else {
        0.0
    }
}

pub fn safe_percentage(numerator: f64, denominator: f64) -> f64 {
    safe_ratio(numerator, denominator) * 100.0
}
