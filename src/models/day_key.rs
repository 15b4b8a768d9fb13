//! Typed calendar-day key
//!
//! Every day comparison, cache path and storage bucket name goes through
//! [`DayKey`] so the `YYYYMMDD` format is parsed in exactly one place.

use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

static DAY_KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{8}$").expect("static day key pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid day key '{0}', expected YYYYMMDD")]
pub struct InvalidDayKey(pub String);

/// A calendar day, rendered as `YYYYMMDD`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DayKey {
    year: i32,
    month: u32,
    day: u32,
}

impl DayKey {
    /// Build a key from components, rejecting impossible dates
    pub fn new(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self::from_date)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
        }
    }

    pub fn today() -> Self {
        Self::from_date(Utc::now().date_naive())
    }

    /// Strict parse of an 8-digit `YYYYMMDD` string
    pub fn parse(value: &str) -> Result<Self, InvalidDayKey> {
        if !DAY_KEY_PATTERN.is_match(value) {
            return Err(InvalidDayKey(value.to_string()));
        }
        Self::from_digits(value).ok_or_else(|| InvalidDayKey(value.to_string()))
    }

    /// Resolve a user-supplied day. `None`, `today` and anything that is not a
    /// valid `YYYYMMDD` date fall back to the current UTC date.
    pub fn resolve(value: Option<&str>) -> Self {
        match value {
            None => Self::today(),
            Some(v) if v.eq_ignore_ascii_case("today") => Self::today(),
            Some(v) => Self::parse(v).unwrap_or_else(|_| Self::today()),
        }
    }

    /// Day key of a packed feed timestamp (`YYYYMMDDHHMMSS ...`)
    pub fn from_feed_timestamp(stamp: &str) -> Option<Self> {
        let digits = stamp.get(..8)?;
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Self::from_digits(digits)
    }

    fn from_digits(digits: &str) -> Option<Self> {
        let year = digits.get(0..4)?.parse().ok()?;
        let month = digits.get(4..6)?.parse().ok()?;
        let day = digits.get(6..8)?.parse().ok()?;
        Self::new(year, month, day)
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn to_date(&self) -> NaiveDate {
        // Components were validated on construction
        NaiveDate::from_ymd_opt(self.year, self.month, self.day).unwrap_or_default()
    }

    /// Object-store path of the cached feed for this day
    pub fn cache_path(&self, prefix: &str) -> String {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            format!("{self}.xml")
        } else {
            format!("{prefix}/{self}.xml")
        }
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}{:02}", self.year, self.month, self.day)
    }
}

impl FromStr for DayKey {
    type Err = InvalidDayKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DayKey {
    type Error = InvalidDayKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DayKey> for String {
    fn from(key: DayKey) -> Self {
        key.to_string()
    }
}
