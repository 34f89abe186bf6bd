use std::{cmp::Ordering, num::NonZeroU64};

use chrono::{DateTime, TimeDelta, Utc};

use crate::{DemandErr, Result};

/// A fixed bucket width used to discretize event timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Granularity {
    micros: i64,
}

impl Granularity {
    /// Creates a new `Granularity`.
    ///
    /// # Returns
    /// An error if the duration is not strictly positive or doesn't fit in microseconds.
    pub fn new(width: TimeDelta) -> Result<Self> {
        match width.num_microseconds() {
            Some(micros) if micros > 0 => Ok(Self { micros }),
            _ => Err(DemandErr::InvalidGranularity),
        }
    }

    /// Creates a new `Granularity` of the given amount of seconds.
    pub fn from_secs(secs: NonZeroU64) -> Result<Self> {
        let secs = i64::try_from(secs.get()).map_err(|_| DemandErr::InvalidGranularity)?;
        let width = TimeDelta::try_seconds(secs).ok_or(DemandErr::InvalidGranularity)?;
        Self::new(width)
    }

    /// Returns the bucket width as a `TimeDelta`.
    pub fn width(&self) -> TimeDelta {
        TimeDelta::microseconds(self.micros)
    }

    /// Rounds a timestamp to the nearest bucket.
    ///
    /// Timestamps exactly halfway between two buckets go to the even one.
    pub fn bucket_of(&self, timestamp: DateTime<Utc>) -> TimeBucket {
        let t = timestamp.timestamp_micros();
        let g = self.micros;
        let q = t.div_euclid(g);
        let r = t.rem_euclid(g);

        let index = match r.cmp(&(g - r)) {
            Ordering::Less => q,
            Ordering::Greater => q + 1,
            Ordering::Equal if q.rem_euclid(2) == 0 => q,
            Ordering::Equal => q + 1,
        };

        TimeBucket { index }
    }

    /// Returns the rounded timestamp a bucket stands for.
    ///
    /// # Returns
    /// `None` if the instant is not representable.
    pub fn timestamp_of(&self, bucket: TimeBucket) -> Option<DateTime<Utc>> {
        let micros = bucket.index.checked_mul(self.micros)?;
        DateTime::from_timestamp_micros(micros)
    }
}

/// A discretized timestamp, ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeBucket {
    index: i64,
}

impl TimeBucket {
    /// Returns the position of this bucket counting from the unix epoch.
    pub fn index(&self) -> i64 {
        self.index
    }

    /// Returns the bucket immediately following this one.
    pub fn next(&self) -> Self {
        Self {
            index: self.index + 1,
        }
    }

    /// Iterates over every bucket from `self` to `last`, both inclusive.
    pub fn range_to(self, last: Self) -> impl Iterator<Item = TimeBucket> {
        (self.index..=last.index).map(|index| TimeBucket { index })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 5, 1, h, m, s).unwrap()
    }

    fn ten_minutes() -> Granularity {
        Granularity::new(TimeDelta::minutes(10)).unwrap()
    }

    #[test]
    fn rejects_non_positive_widths() {
        assert!(Granularity::new(TimeDelta::zero()).is_err());
        assert!(Granularity::new(TimeDelta::minutes(-10)).is_err());
    }

    #[test]
    fn rounds_to_the_nearest_bucket() {
        let g = ten_minutes();

        assert_eq!(g.bucket_of(at(8, 4, 59)), g.bucket_of(at(8, 0, 0)));
        assert_eq!(g.bucket_of(at(8, 5, 1)), g.bucket_of(at(8, 10, 0)));
        assert_eq!(g.timestamp_of(g.bucket_of(at(8, 13, 0))), Some(at(8, 10, 0)));
    }

    #[test]
    fn ties_round_to_the_even_bucket() {
        let g = ten_minutes();
        let b0 = g.bucket_of(at(8, 0, 0));
        let b1 = g.bucket_of(at(8, 10, 0));
        let even = if b0.index() % 2 == 0 { b0 } else { b1 };

        assert_eq!(g.bucket_of(at(8, 5, 0)), even);
    }

    #[test]
    fn buckets_are_ordered_chronologically() {
        let g = ten_minutes();
        let early = g.bucket_of(at(7, 50, 0));
        let late = g.bucket_of(at(8, 0, 0));

        assert!(early < late);
        assert_eq!(early.next(), late);
        assert_eq!(early.range_to(late).count(), 2);
    }

    #[test]
    fn from_secs_matches_time_delta() {
        let g = Granularity::from_secs(NonZeroU64::new(600).unwrap()).unwrap();
        assert_eq!(g, ten_minutes());
        assert_eq!(g.width(), TimeDelta::minutes(10));
    }
}
