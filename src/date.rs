//! Signing-date expressions
//!
//! The stamp's date line is normally the day the document is signed, but a
//! caller can back-date or pin it with an expression.

use chrono::{Days, Local, NaiveDate};

use crate::error::{Error, Result};

/// Default output format: "October 16, 2026"
pub const DEFAULT_DATE_FORMAT: &str = "%B %-d, %Y";

/// A date relative to today or a fixed calendar date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateExpression {
    /// Today shifted by a number of days (`today`, `yesterday`, `today-3`)
    Relative(i64),
    /// A fixed date
    Explicit(NaiveDate),
}

impl DateExpression {
    pub const TODAY: Self = DateExpression::Relative(0);
}

/// Parse a date expression
///
/// Supported formats:
/// - `"today"`, `"yesterday"`, `"tomorrow"`
/// - `"today-3"`, `"today + 1"` (offset in days)
/// - `"2026-10-16"` (ISO)
/// - `"10/16/2026"` (US)
pub fn parse_date_expression(expr: &str) -> Result<DateExpression> {
    let expr = expr.trim();
    let lower = expr.to_ascii_lowercase();

    match lower.as_str() {
        "" | "today" | "now" => return Ok(DateExpression::TODAY),
        "yesterday" => return Ok(DateExpression::Relative(-1)),
        "tomorrow" => return Ok(DateExpression::Relative(1)),
        _ => {}
    }

    if let Some(rest) = lower.strip_prefix("today") {
        let rest = rest.trim_start();
        let sign = match rest.chars().next() {
            Some('+') => 1,
            Some('-') => -1,
            _ => return Err(invalid(expr)),
        };
        let days: u32 = rest[1..].trim().parse().map_err(|_| invalid(expr))?;
        return Ok(DateExpression::Relative(sign * i64::from(days)));
    }

    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(expr, format) {
            return Ok(DateExpression::Explicit(date));
        }
    }

    Err(invalid(expr))
}

fn invalid(expr: &str) -> Error {
    Error::InvalidDateExpression(format!("Unable to parse date expression: {expr}"))
}

/// Resolve against the local calendar date
pub fn resolve_date(expr: &DateExpression) -> Result<NaiveDate> {
    resolve_date_from(expr, Local::now().date_naive())
}

/// Resolve against a given "today"
///
/// Fails when the offset leaves chrono's calendar range.
pub fn resolve_date_from(expr: &DateExpression, today: NaiveDate) -> Result<NaiveDate> {
    match *expr {
        DateExpression::Relative(days) => {
            let shift = Days::new(days.unsigned_abs());
            let date = if days >= 0 {
                today.checked_add_days(shift)
            } else {
                today.checked_sub_days(shift)
            };
            date.ok_or_else(|| {
                Error::InvalidDateExpression(format!("today{days:+} is out of range"))
            })
        }
        DateExpression::Explicit(date) => Ok(date),
    }
}

/// Format a date with a chrono format string
pub fn format_date(date: &NaiveDate, format: &str) -> String {
    date.format(format).to_string()
}
