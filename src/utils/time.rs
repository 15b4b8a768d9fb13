//! Feed timestamp decoding
//!
//! Feed timestamps are packed `YYYYMMDDHHMMSS` strings, optionally followed by
//! a timezone offset. Only the leading digits (at most 14) are significant and
//! each two-digit field is taken as a UTC component; the offset is ignored.

use chrono::{DateTime, NaiveDate, Utc};

/// Significant prefix of a packed timestamp
const STAMP_LEN: usize = 14;

/// Decode a packed feed timestamp.
///
/// Missing trailing time fields count as zero, so `2024060100000` decodes to
/// midnight. Returns `None` when fewer than eight leading digits are present,
/// the date is not a real calendar day, or a time field is out of range.
pub fn parse_feed_timestamp(stamp: &str) -> Option<DateTime<Utc>> {
    let digits: String = stamp
        .trim_start()
        .chars()
        .take(STAMP_LEN)
        .take_while(char::is_ascii_digit)
        .collect();
    if digits.len() < 8 {
        return None;
    }

    let year: i32 = digits[0..4].parse().ok()?;
    let month: u32 = digits[4..6].parse().ok()?;
    let day: u32 = digits[6..8].parse().ok()?;

    let field = |from: usize| -> Option<u32> {
        match digits.get(from..).filter(|s| !s.is_empty()) {
            None => Some(0),
            Some(rest) => rest.get(..2).unwrap_or(rest).parse().ok(),
        }
    };
    let hour = field(8)?;
    let minute = field(10)?;
    let second = field(12)?;

    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(hour, minute, second)
        .map(|naive| naive.and_utc())
}
