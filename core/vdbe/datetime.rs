use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};

use crate::expr::Timepart;

const MICROS_PER_MILLI: i64 = 1000;
const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;
const MICROS_PER_DAY: i64 = 24 * MICROS_PER_HOUR;

fn toDateTime(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(ts)
}

fn fromDate(date: NaiveDate) -> Option<i64> {
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_micros())
}

fn addMonths(ts: i64, n: i64) -> Option<i64> {
    let dt = toDateTime(ts)?;
    let months = Months::new(u32::try_from(n.unsigned_abs()).ok()?);
    // the day of month is clamped to the length of the target month
    let out = if n >= 0 {
        dt.checked_add_months(months)?
    } else {
        dt.checked_sub_months(months)?
    };
    Some(out.timestamp_micros())
}

/// Implementation of DATE_ADD(part, n, ts).
///
/// Sub-day parts add a fixed number of microseconds; months, quarters and
/// years are calendar arithmetic. `None` on overflow.
pub fn dateAdd(ts: i64, n: i64, part: Timepart) -> Option<i64> {
    let unit = match part {
        Timepart::Microsecond => 1,
        Timepart::Millisecond => MICROS_PER_MILLI,
        Timepart::Second => MICROS_PER_SECOND,
        Timepart::Minute => MICROS_PER_MINUTE,
        Timepart::Hour => MICROS_PER_HOUR,
        Timepart::Day | Timepart::DOW | Timepart::DOY => MICROS_PER_DAY,
        Timepart::Month => return addMonths(ts, n),
        Timepart::Quarter => return addMonths(ts, n.checked_mul(3)?),
        Timepart::Year => return addMonths(ts, n.checked_mul(12)?),
    };
    ts.checked_add(n.checked_mul(unit)?)
}

/// Implementation of EXTRACT(part FROM ts).
///
/// Microseconds and milliseconds count from the start of the minute, and
/// the day of week is 0 for Sunday.
pub fn dateExtract(ts: i64, part: Timepart) -> Option<i64> {
    let inMinute = ts.rem_euclid(MICROS_PER_MINUTE);
    let out = match part {
        Timepart::Microsecond => inMinute,
        Timepart::Millisecond => inMinute / MICROS_PER_MILLI,
        Timepart::Second => inMinute / MICROS_PER_SECOND,
        Timepart::Minute => ts.rem_euclid(MICROS_PER_HOUR) / MICROS_PER_MINUTE,
        Timepart::Hour => ts.rem_euclid(MICROS_PER_DAY) / MICROS_PER_HOUR,
        // 1970-01-01 was a thursday
        Timepart::DOW => (ts.div_euclid(MICROS_PER_DAY) + 4).rem_euclid(7),
        Timepart::Day => toDateTime(ts)?.day() as i64,
        Timepart::DOY => toDateTime(ts)?.ordinal() as i64,
        Timepart::Month => toDateTime(ts)?.month() as i64,
        Timepart::Quarter => (toDateTime(ts)?.month0() / 3 + 1) as i64,
        Timepart::Year => toDateTime(ts)?.year() as i64,
    };
    Some(out)
}

fn truncTo(ts: i64, unit: i64) -> i64 {
    ts.div_euclid(unit) * unit
}

/// Implementation of DATE_TRUNC(part, ts). Weeks start on sunday.
pub fn dateTrunc(ts: i64, part: Timepart) -> Option<i64> {
    match part {
        Timepart::Microsecond => Some(ts),
        Timepart::Millisecond => Some(truncTo(ts, MICROS_PER_MILLI)),
        Timepart::Second => Some(truncTo(ts, MICROS_PER_SECOND)),
        Timepart::Minute => Some(truncTo(ts, MICROS_PER_MINUTE)),
        Timepart::Hour => Some(truncTo(ts, MICROS_PER_HOUR)),
        Timepart::Day | Timepart::DOY => Some(truncTo(ts, MICROS_PER_DAY)),
        Timepart::DOW => {
            let days = ts.div_euclid(MICROS_PER_DAY);
            let sunday = (days + 4).div_euclid(7) * 7 - 4;
            Some(sunday * MICROS_PER_DAY)
        }
        Timepart::Month => {
            let dt = toDateTime(ts)?;
            fromDate(NaiveDate::from_ymd_opt(dt.year(), dt.month(), 1)?)
        }
        Timepart::Quarter => {
            let dt = toDateTime(ts)?;
            fromDate(NaiveDate::from_ymd_opt(dt.year(), dt.month0() / 3 * 3 + 1, 1)?)
        }
        Timepart::Year => {
            let dt = toDateTime(ts)?;
            fromDate(NaiveDate::from_ymd_opt(dt.year(), 1, 1)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, m: u32, d: u32, hh: u32, mm: u32, ss: u32) -> i64 {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(hh, mm, ss).unwrap().and_utc().timestamp_micros()
    }

    #[test]
    fn test_extract() {
        let t = ts(2024, 2, 29, 13, 45, 12) + 345_678;
        assert_eq!(dateExtract(t, Timepart::Year), Some(2024));
        assert_eq!(dateExtract(t, Timepart::Quarter), Some(1));
        assert_eq!(dateExtract(t, Timepart::Month), Some(2));
        assert_eq!(dateExtract(t, Timepart::Day), Some(29));
        assert_eq!(dateExtract(t, Timepart::DOY), Some(60));
        assert_eq!(dateExtract(t, Timepart::Hour), Some(13));
        assert_eq!(dateExtract(t, Timepart::Minute), Some(45));
        assert_eq!(dateExtract(t, Timepart::Second), Some(12));
        assert_eq!(dateExtract(t, Timepart::Millisecond), Some(12_345));
        assert_eq!(dateExtract(t, Timepart::Microsecond), Some(12_345_678));
        // thursday
        assert_eq!(dateExtract(0, Timepart::DOW), Some(4));
        // wednesday, before the epoch
        assert_eq!(dateExtract(ts(1969, 12, 31, 23, 0, 0), Timepart::DOW), Some(3));
    }

    #[test]
    fn test_trunc() {
        let t = ts(2023, 8, 17, 10, 30, 59) + 1;
        assert_eq!(dateTrunc(t, Timepart::Second), Some(ts(2023, 8, 17, 10, 30, 59)));
        assert_eq!(dateTrunc(t, Timepart::Hour), Some(ts(2023, 8, 17, 10, 0, 0)));
        assert_eq!(dateTrunc(t, Timepart::Day), Some(ts(2023, 8, 17, 0, 0, 0)));
        // 2023-08-17 is a thursday; the week began on sunday the 13th
        assert_eq!(dateTrunc(t, Timepart::DOW), Some(ts(2023, 8, 13, 0, 0, 0)));
        assert_eq!(dateTrunc(t, Timepart::Month), Some(ts(2023, 8, 1, 0, 0, 0)));
        assert_eq!(dateTrunc(t, Timepart::Quarter), Some(ts(2023, 7, 1, 0, 0, 0)));
        assert_eq!(dateTrunc(t, Timepart::Year), Some(ts(2023, 1, 1, 0, 0, 0)));
        assert_eq!(dateTrunc(-1, Timepart::Second), Some(-MICROS_PER_SECOND));
    }

    #[test]
    fn test_add() {
        let t = ts(2024, 1, 31, 12, 0, 0);
        assert_eq!(dateAdd(t, 1, Timepart::Month), Some(ts(2024, 2, 29, 12, 0, 0)));
        assert_eq!(dateAdd(t, -2, Timepart::Month), Some(ts(2023, 11, 30, 12, 0, 0)));
        assert_eq!(dateAdd(t, 1, Timepart::Quarter), Some(ts(2024, 4, 30, 12, 0, 0)));
        assert_eq!(dateAdd(t, 1, Timepart::Year), Some(ts(2025, 1, 31, 12, 0, 0)));
        assert_eq!(dateAdd(t, 36, Timepart::Hour), Some(ts(2024, 2, 2, 0, 0, 0)));
        assert_eq!(dateAdd(t, i64::MAX, Timepart::Day), None);
    }
}
