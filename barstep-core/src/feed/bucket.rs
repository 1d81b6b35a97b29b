//! Bucket keys for resampling.
//!
//! Intraday frames bucket on elapsed time aligned to the Unix epoch: a bar
//! stamped `t` belongs to the bucket ending at `ceil(t / span) * span`, so a
//! bar sitting exactly on a boundary closes its bucket. Day and coarser
//! frames bucket on calendar keys (day number, Monday-based week, month,
//! year) divided by the compression.

use super::sync::SyncError;
use crate::domain::TimeFrame;
use chrono::{DateTime, Datelike, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Bucketing {
    pub timeframe: TimeFrame,
    pub compression: u32,
}

impl Bucketing {
    pub fn new(timeframe: TimeFrame, compression: u32) -> Result<Self, SyncError> {
        if compression == 0 {
            return Err(SyncError::InvalidCompression(
                "compression must be >= 1".into(),
            ));
        }
        Ok(Self {
            timeframe,
            compression,
        })
    }

    fn span_seconds(&self) -> Option<i64> {
        self.timeframe
            .unit_seconds()
            .map(|unit| unit * i64::from(self.compression))
    }

    /// Bucket key of a bar stamped `ts`. Ticks are counted, not keyed, and
    /// always map to 0 here.
    pub fn key(&self, ts: DateTime<Utc>) -> i64 {
        let comp = i64::from(self.compression);
        if let Some(span) = self.span_seconds() {
            let mut secs = ts.timestamp();
            if ts.timestamp_subsec_nanos() > 0 {
                secs += 1;
            }
            return (secs + span - 1).div_euclid(span);
        }
        let date = ts.date_naive();
        let days = i64::from(date.num_days_from_ce());
        match self.timeframe {
            TimeFrame::Days => days.div_euclid(comp),
            // 0001-01-01 is a Monday, so this counts Monday-based weeks.
            TimeFrame::Weeks => (days - 1).div_euclid(7).div_euclid(comp),
            TimeFrame::Months => {
                (i64::from(date.year()) * 12 + i64::from(date.month0())).div_euclid(comp)
            }
            TimeFrame::Years => i64::from(date.year()).div_euclid(comp),
            TimeFrame::Ticks | TimeFrame::Seconds | TimeFrame::Minutes => 0,
        }
    }

    /// Close time of an intraday bucket.
    pub fn end(&self, key: i64) -> Option<DateTime<Utc>> {
        let span = self.span_seconds()?;
        DateTime::<Utc>::from_timestamp(key.checked_mul(span)?, 0)
    }

    /// Timestamp for an aggregate: the bucket end for intraday frames, the
    /// latest sub-bar time otherwise.
    pub fn stamp(&self, key: i64, latest: DateTime<Utc>) -> DateTime<Utc> {
        self.end(key).unwrap_or(latest)
    }

    /// True when a sub-bar stamped `ts` sits exactly on its bucket's end.
    pub fn on_boundary(&self, ts: DateTime<Utc>) -> bool {
        self.end(self.key(ts)) == Some(ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, 0).unwrap()
    }

    #[test]
    fn five_minute_buckets_close_on_boundary() {
        let b = Bucketing::new(TimeFrame::Minutes, 5).unwrap();
        let k1 = b.key(at(2024, 1, 2, 9, 31));
        let k5 = b.key(at(2024, 1, 2, 9, 35));
        let k6 = b.key(at(2024, 1, 2, 9, 36));
        assert_eq!(k1, k5);
        assert_ne!(k5, k6);
        assert!(b.on_boundary(at(2024, 1, 2, 9, 35)));
        assert!(!b.on_boundary(at(2024, 1, 2, 9, 34)));
        assert_eq!(b.end(k1), Some(at(2024, 1, 2, 9, 35)));
    }

    #[test]
    fn weeks_start_on_monday() {
        let b = Bucketing::new(TimeFrame::Weeks, 1).unwrap();
        // 2024-01-07 is a Sunday, 2024-01-08 a Monday.
        assert_eq!(b.key(at(2024, 1, 2, 0, 0)), b.key(at(2024, 1, 7, 0, 0)));
        assert_ne!(b.key(at(2024, 1, 7, 0, 0)), b.key(at(2024, 1, 8, 0, 0)));
    }

    #[test]
    fn months_and_years() {
        let m = Bucketing::new(TimeFrame::Months, 1).unwrap();
        assert_eq!(m.key(at(2024, 1, 2, 0, 0)), m.key(at(2024, 1, 31, 0, 0)));
        assert_ne!(m.key(at(2024, 1, 31, 0, 0)), m.key(at(2024, 2, 1, 0, 0)));
        let q = Bucketing::new(TimeFrame::Months, 3).unwrap();
        assert_eq!(q.key(at(2024, 1, 5, 0, 0)), q.key(at(2024, 3, 5, 0, 0)));
        let y = Bucketing::new(TimeFrame::Years, 1).unwrap();
        assert_ne!(y.key(at(2023, 12, 31, 0, 0)), y.key(at(2024, 1, 1, 0, 0)));
    }

    #[test]
    fn day_frames_have_no_end() {
        let b = Bucketing::new(TimeFrame::Days, 1).unwrap();
        assert_eq!(b.end(5), None);
        let latest = at(2024, 1, 2, 16, 0);
        assert_eq!(b.stamp(b.key(latest), latest), latest);
    }

    #[test]
    fn zero_compression_is_rejected() {
        assert!(Bucketing::new(TimeFrame::Minutes, 0).is_err());
    }
}
