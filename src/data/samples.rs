use std::{collections::BTreeMap, num::NonZeroUsize};

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{Event, Granularity, TimeBucket};
use crate::{
    Result,
    geo::{BoundingBox, DemandGrid, GridShape, RasterStats, Rasterizer},
};

/// Which time buckets make up the sequence samples are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketCoverage {
    /// Only buckets at least one event was rounded to, quiet buckets are skipped.
    Observed,
    /// Every bucket between `start` and `end` inclusive, gaps become all-zero grids.
    ///
    /// Missing bounds default to the first and last observed buckets. One grid is allocated
    /// per bucket in the range, so far apart bounds cost memory proportional to their span.
    /// Events rounded to buckets outside the range are counted as dropped.
    Contiguous {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
}

impl Default for BucketCoverage {
    fn default() -> Self {
        Self::Contiguous {
            start: None,
            end: None,
        }
    }
}

/// A supervised pair: `history` consecutive grids and the grid of the bucket that follows them.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    input: Vec<DemandGrid>,
    label: DemandGrid,
    input_buckets: Vec<TimeBucket>,
    label_bucket: TimeBucket,
}

impl Sample {
    /// The input grids, oldest first.
    pub fn input(&self) -> &[DemandGrid] {
        &self.input
    }

    pub fn label(&self) -> &DemandGrid {
        &self.label
    }

    pub fn input_buckets(&self) -> &[TimeBucket] {
        &self.input_buckets
    }

    pub fn label_bucket(&self) -> TimeBucket {
        self.label_bucket
    }
}

/// Turns a stream of events into time-windowed samples.
#[derive(Debug, Clone)]
pub struct SampleBuilder {
    rasterizer: Rasterizer,
    granularity: Granularity,
    history: NonZeroUsize,
    coverage: BucketCoverage,
}

impl SampleBuilder {
    /// Creates a new `SampleBuilder` with a one bucket lookback over every bucket between the
    /// first and last observed ones.
    ///
    /// # Arguments
    /// * `bbox` - The spatial domain mapped onto the grids.
    /// * `shape` - The shape of every grid.
    /// * `granularity` - The width of the time buckets.
    pub fn new(bbox: BoundingBox, shape: GridShape, granularity: Granularity) -> Self {
        Self {
            rasterizer: Rasterizer::new(bbox, shape),
            granularity,
            history: NonZeroUsize::MIN,
            coverage: BucketCoverage::default(),
        }
    }

    /// Sets the amount of consecutive grids every sample's input holds.
    pub fn with_history(mut self, history: NonZeroUsize) -> Self {
        self.history = history;
        self
    }

    pub fn with_coverage(mut self, coverage: BucketCoverage) -> Self {
        self.coverage = coverage;
        self
    }

    pub fn shape(&self) -> GridShape {
        self.rasterizer.shape()
    }

    pub fn history(&self) -> NonZeroUsize {
        self.history
    }

    /// Builds the samples for an event stream.
    ///
    /// Events may come in any order, buckets are walked chronologically. Fewer than
    /// `history + 1` buckets yield no samples.
    pub fn build(&self, events: &[Event]) -> Vec<Sample> {
        self.build_with_stats(events).0
    }

    /// Builds the samples for an event stream and reports how many points were dropped.
    pub fn build_with_stats(&self, events: &[Event]) -> (Vec<Sample>, RasterStats) {
        let mut groups: BTreeMap<TimeBucket, Vec<(f64, f64)>> = BTreeMap::new();

        for event in events {
            let bucket = self.granularity.bucket_of(event.timestamp);
            groups.entry(bucket).or_default().push(event.location());
        }

        let buckets = self.bucket_sequence(&groups);
        let rasterized: Vec<_> = buckets
            .par_iter()
            .map(|bucket| {
                let points = groups.get(bucket).map(Vec::as_slice).unwrap_or_default();
                self.rasterizer.rasterize(points.iter().copied())
            })
            .collect();

        let mut stats = RasterStats {
            kept: 0,
            dropped: groups
                .iter()
                .filter(|&(bucket, _)| buckets.binary_search(bucket).is_err())
                .map(|(_, points)| points.len())
                .sum(),
        };

        if stats.dropped > 0 {
            debug!(dropped = stats.dropped; "events outside the bucket coverage");
        }

        let mut grids = Vec::with_capacity(rasterized.len());

        for (bucket, (grid, bucket_stats)) in buckets.iter().zip(rasterized) {
            debug!(
                bucket = bucket.index(),
                kept = bucket_stats.kept,
                dropped = bucket_stats.dropped;
                "rasterized bucket"
            );

            stats += bucket_stats;
            grids.push(grid);
        }

        let k = self.history.get();
        let samples: Vec<_> = grids
            .windows(k + 1)
            .zip(buckets.windows(k + 1))
            .map(|(grids, buckets)| Sample {
                input: grids[..k].to_vec(),
                label: grids[k].clone(),
                input_buckets: buckets[..k].to_vec(),
                label_bucket: buckets[k],
            })
            .collect();

        info!(
            events = events.len(),
            buckets = buckets.len(),
            samples = samples.len(),
            dropped = stats.dropped;
            "built demand samples"
        );

        (samples, stats)
    }

    fn bucket_sequence(&self, groups: &BTreeMap<TimeBucket, Vec<(f64, f64)>>) -> Vec<TimeBucket> {
        let BucketCoverage::Contiguous { start, end } = self.coverage else {
            return groups.keys().copied().collect();
        };

        let first = start
            .map(|t| self.granularity.bucket_of(t))
            .or_else(|| groups.keys().next().copied());

        let last = end
            .map(|t| self.granularity.bucket_of(t))
            .or_else(|| groups.keys().next_back().copied());

        match (first, last) {
            (Some(first), Some(last)) => first.range_to(last).collect(),
            _ => Vec::new(),
        }
    }
}

/// Builds one bucket lookback samples out of an event stream.
///
/// Every bucket between the first and last observed ones takes part, quiet buckets yield
/// all-zero grids, so a sample's label is always the bucket right after its input.
///
/// # Arguments
/// * `events` - The events, in any order.
/// * `granularity` - The width of the time buckets.
/// * `bbox` - The spatial domain mapped onto the grids.
/// * `shape` - The shape of every grid.
///
/// # Returns
/// One sample per bucket that has a predecessor, or an error if the granularity is not
/// positive.
pub fn build_samples(
    events: &[Event],
    granularity: TimeDelta,
    bbox: &BoundingBox,
    shape: GridShape,
) -> Result<Vec<Sample>> {
    let granularity = Granularity::new(granularity)?;
    Ok(SampleBuilder::new(*bbox, shape, granularity).build(events))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn bbox() -> BoundingBox {
        BoundingBox::new(0.0, 4.0, 0.0, 4.0).unwrap()
    }

    fn shape() -> GridShape {
        GridShape::from_dims(4, 4).unwrap()
    }

    fn minute(m: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 5, 1, 8, 0, 0).unwrap() + TimeDelta::minutes(m)
    }

    fn builder() -> SampleBuilder {
        SampleBuilder::new(bbox(), shape(), Granularity::new(TimeDelta::minutes(10)).unwrap())
    }

    #[test]
    fn n_buckets_yield_n_minus_one_chronological_samples() {
        // Pushed out of order on purpose.
        let events = vec![
            Event::new(1.5, 1.5, minute(30)),
            Event::new(0.5, 0.5, minute(0)),
            Event::new(2.5, 2.5, minute(50)),
            Event::new(3.5, 0.5, minute(10)),
            Event::new(0.5, 3.5, minute(1)),
        ];

        // Buckets 0 through 50, the quiet ones included.
        let samples = builder().build(&events);
        assert_eq!(samples.len(), 5);

        for sample in &samples {
            assert_eq!(sample.input_buckets()[0].next(), sample.label_bucket());
        }

        assert_eq!(samples[0].input()[0].sum(), 2.0);
        assert_eq!(samples[0].label().get(3, 0), Some(1.0));
        assert!(samples[1].label().is_all_zero());
        assert_eq!(samples[2].label().get(1, 1), Some(1.0));
        assert_eq!(samples[4].label().get(2, 2), Some(1.0));

        let observed = builder().with_coverage(BucketCoverage::Observed).build(&events);
        assert_eq!(observed.len(), 3);
        assert_eq!(observed[1].label(), samples[2].label());
    }

    #[test]
    fn zero_or_one_bucket_yields_no_samples() {
        assert!(builder().build(&[]).is_empty());

        let events = vec![
            Event::new(0.5, 0.5, minute(0)),
            Event::new(1.5, 0.5, minute(2)),
        ];
        assert!(builder().build(&events).is_empty());
    }

    #[test]
    fn free_function_uses_a_single_step_lookback() {
        let events = vec![
            Event::new(0.5, 0.5, minute(0)),
            Event::new(1.5, 0.5, minute(10)),
        ];

        let samples = build_samples(&events, TimeDelta::minutes(10), &bbox(), shape()).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].input().len(), 1);
        assert_eq!(samples[0].input_buckets()[0].next(), samples[0].label_bucket());
        assert_eq!(samples[0].label().get(1, 0), Some(1.0));

        assert!(build_samples(&events, TimeDelta::zero(), &bbox(), shape()).is_err());
    }

    #[test]
    fn free_function_keeps_quiet_buckets_between_events() {
        let events = vec![
            Event::new(0.5, 0.5, minute(0)),
            Event::new(1.5, 0.5, minute(20)),
        ];

        let samples = build_samples(&events, TimeDelta::minutes(10), &bbox(), shape()).unwrap();
        assert_eq!(samples.len(), 2);

        for sample in &samples {
            assert_eq!(sample.input_buckets()[0].next(), sample.label_bucket());
        }

        assert_eq!(samples[0].input()[0].sum(), 1.0);
        assert!(samples[0].label().is_all_zero());
        assert!(samples[1].input()[0].is_all_zero());
        assert_eq!(samples[1].label().get(1, 0), Some(1.0));
    }

    #[test]
    fn history_stacks_consecutive_grids() {
        let events: Vec<_> = (0..5)
            .map(|i| Event::new(0.5 + i as f64 * 0.1, 0.5, minute(i * 10)))
            .collect();

        let builder = builder().with_history(NonZeroUsize::new(3).unwrap());
        let samples = builder.build(&events);

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].input().len(), 3);
        assert_eq!(samples[1].input_buckets()[..2], samples[0].input_buckets()[1..]);
        assert_eq!(samples[1].input_buckets()[2].next(), samples[1].label_bucket());
        assert_eq!(samples[0].label(), &samples[1].input()[2]);
    }

    #[test]
    fn contiguous_coverage_fills_gaps_with_zero_grids() {
        let events = vec![
            Event::new(0.5, 0.5, minute(0)),
            Event::new(1.5, 0.5, minute(30)),
        ];

        let observed = builder().with_coverage(BucketCoverage::Observed).build(&events);
        assert_eq!(observed.len(), 1);
        assert_eq!(builder().build(&events).len(), 3);

        let contiguous = builder()
            .with_coverage(BucketCoverage::Contiguous {
                start: None,
                end: Some(minute(50)),
            })
            .build(&events);

        // Buckets 0, 10, 20, 30, 40, 50.
        assert_eq!(contiguous.len(), 5);
        assert!(contiguous[0].label().is_all_zero());
        assert_eq!(contiguous[2].label().sum(), 1.0);
        assert!(contiguous[4].label().is_all_zero());
    }

    #[test]
    fn dropped_points_are_counted() {
        let events = vec![
            Event::new(0.5, 0.5, minute(0)),
            Event::new(10.0, 0.5, minute(10)),
            Event::new(1.0, 1.0, minute(10)),
        ];

        let (samples, stats) = builder().build_with_stats(&events);
        assert_eq!(samples.len(), 1);
        assert_eq!(stats, RasterStats { kept: 2, dropped: 1 });
        assert_eq!(samples[0].label().sum(), 1.0);
    }

    #[test]
    fn events_outside_the_coverage_are_counted_as_dropped() {
        let events = vec![
            Event::new(0.5, 0.5, minute(0)),
            Event::new(1.5, 0.5, minute(10)),
            Event::new(2.5, 0.5, minute(20)),
            Event::new(3.5, 0.5, minute(20)),
            Event::new(3.5, 1.5, minute(40)),
        ];

        let (samples, stats) = builder()
            .with_coverage(BucketCoverage::Contiguous {
                start: Some(minute(10)),
                end: Some(minute(30)),
            })
            .build_with_stats(&events);

        // Buckets 10, 20 and 30.
        assert_eq!(samples.len(), 2);
        assert_eq!(stats, RasterStats { kept: 3, dropped: 2 });
        assert_eq!(stats.total(), events.len());
    }
}
