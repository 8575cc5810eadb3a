use crate::error::{ReconciliationError, Result};
use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};

/// Column suffixes used by contribution sources, January first.
pub const MONTH_NAMES: [&str; 12] = [
    "ENERO",
    "FEBRERO",
    "MARZO",
    "ABRIL",
    "MAYO",
    "JUNIO",
    "JULIO",
    "AGOSTO",
    "SEPTIEMBRE",
    "OCTUBRE",
    "NOVIEMBRE",
    "DICIEMBRE",
];

pub fn first_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
        ReconciliationError::DateError(format!("Invalid calendar month {}-{:02}", year, month))
    })
}

pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// First day of the calendar month after `date`.
pub fn next_month_start(date: NaiveDate) -> Result<NaiveDate> {
    month_start(date)
        .checked_add_months(Months::new(1))
        .ok_or_else(|| ReconciliationError::DateError(format!("No month follows {}", date)))
}

/// First day of the month `lookback_months` before the month containing `as_of`.
pub fn lookback_month_start(as_of: NaiveDate, lookback_months: u32) -> Result<NaiveDate> {
    let start = month_start(as_of)
        .checked_sub_months(Months::new(lookback_months))
        .ok_or_else(|| {
            ReconciliationError::DateError(format!(
                "Cannot look back {} months from {}",
                lookback_months, as_of
            ))
        })?;
    debug_assert_eq!(i64::from(months_between(start, as_of)), i64::from(lookback_months));
    Ok(start)
}

/// Calendar months from the month of `start` to the month of `end`, ignoring days.
pub fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    (end.year() - start.year()) * 12 + end.month0() as i32 - start.month0() as i32
}

/// Rounds half away from zero to two decimal places.
pub fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Splits a `YYYYMM` code into `(year, month)`.
pub fn parse_month_code(code: &str) -> Result<(i32, u32)> {
    let code = code.trim();
    // Numeric exports sometimes carry a trailing ".0"
    let code = code.strip_suffix(".0").unwrap_or(code);

    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(ReconciliationError::DateError(format!(
            "Invalid month code: {}. Expected YYYYMM",
            code
        )));
    }

    let year: i32 = code[..4]
        .parse()
        .map_err(|_| ReconciliationError::DateError(format!("Invalid year in {}", code)))?;
    let month: u32 = code[4..]
        .parse()
        .map_err(|_| ReconciliationError::DateError(format!("Invalid month in {}", code)))?;

    if !(1..=12).contains(&month) {
        return Err(ReconciliationError::DateError(format!(
            "Month {} out of range in code {}",
            month, code
        )));
    }

    Ok((year, month))
}

/// Parses the period-end dates found in inspection sources.
pub fn parse_period_date(value: &str) -> Result<NaiveDate> {
    let value = value.trim();

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(datetime.date());
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(datetime.date());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%d/%m/%Y") {
        return Ok(date);
    }

    Err(ReconciliationError::DateError(format!(
        "Invalid period date: {}. Expected YYYY-MM-DD or DD/MM/YYYY",
        value
    )))
}
