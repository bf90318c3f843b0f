//! Date helpers for the Epidata wire format.
//!
//! The Epidata API addresses days as `YYYYMMDD` integers (e.g. `20200401`);
//! internally everything is a [`chrono::NaiveDate`]. Conversion happens only
//! at the client boundary.

use chrono::{Datelike, NaiveDate};

use crate::{Error, Result};

/// Parse a `YYYYMMDD` integer into a date.
pub fn from_yyyymmdd(value: u32) -> Result<NaiveDate> {
    let year = (value / 10_000) as i32;
    let month = value / 100 % 100;
    let day = value % 100;
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| Error::DataError(format!("invalid YYYYMMDD date: {value}")))
}

/// Render a date as a `YYYYMMDD` integer.
pub fn to_yyyymmdd(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}
