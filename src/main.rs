use std::{env, f64::consts::TAU};

use anyhow::Context;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use log::{info, warn};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal, Poisson};

use demand_forecast::{
    arch::{DemandNet, Model},
    config::DemandConfig,
    data::{DataLoader, DemandDataset, Event, SampleBuilder},
    geo::BoundingBox,
    training,
};

const DEFAULT_SEED: u64 = 42;

// Manhattan, as (min_lon, max_lon, min_lat, max_lat).
const AREA: (f64, f64, f64, f64) = (-74.0238, -73.9187, 40.6967, 40.8186);

// Midtown, the Financial District and the Upper East Side.
const HOTSPOTS: [(f64, f64); 3] = [
    (-73.9855, 40.7580),
    (-74.0110, 40.7069),
    (-73.9626, 40.7794),
];
const HOTSPOT_SPREAD: f64 = 0.008;

const DAYS: i64 = 2;
const MEAN_EVENTS_PER_BUCKET: f64 = 40.;
const TRAIN_FRACTION: f64 = 0.8;

/// Synthesizes a day-periodic stream of ride requests around a few hotspots, one vector of
/// events per time bucket.
fn synthesize<R: Rng>(
    rng: &mut R,
    start: DateTime<Utc>,
    width: TimeDelta,
) -> anyhow::Result<Vec<Vec<Event>>> {
    let buckets_per_day = (TimeDelta::days(1).num_seconds() / width.num_seconds().max(1)).max(1);
    // Keeps every event closer to its own bucket than to the neighbouring ones.
    let max_jitter = (width.num_seconds() - 1) / 2;
    let spread = Normal::new(0., HOTSPOT_SPREAD)?;

    (0..DAYS * buckets_per_day)
        .map(|i| {
            let phase = TAU * (i % buckets_per_day) as f64 / buckets_per_day as f64;
            let lambda = MEAN_EVENTS_PER_BUCKET * (1.2 - phase.cos()).max(0.1);
            let count = Poisson::new(lambda)?.sample(rng) as usize;
            let center = start + width * i as i32;

            let events: Vec<_> = (0..count)
                .map(|_| {
                    let (lon, lat) = HOTSPOTS[rng.random_range(0..HOTSPOTS.len())];
                    let jitter = TimeDelta::seconds(rng.random_range(-max_jitter..=max_jitter));

                    Event::new(lon + spread.sample(rng), lat + spread.sample(rng), center + jitter)
                })
                .collect();

            Ok::<_, anyhow::Error>(events)
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match env::var("DEMAND_CONFIG") {
        Ok(path) => DemandConfig::from_path(&path)
            .with_context(|| format!("failed to load the config at {path}"))?,
        Err(_) => DemandConfig::default(),
    };

    let training_config = &config.training;
    let granularity = config.granularity()?;
    let mut rng = StdRng::seed_from_u64(training_config.seed.unwrap_or(DEFAULT_SEED));

    let (min_lon, max_lon, min_lat, max_lat) = AREA;
    let bbox = BoundingBox::new(min_lon, max_lon, min_lat, max_lat)?;
    let start = Utc
        .with_ymd_and_hms(2019, 5, 1, 0, 0, 0)
        .single()
        .context("invalid start date")?;

    let buckets = synthesize(&mut rng, start, granularity.width())?;
    let split = (buckets.len() as f64 * TRAIN_FRACTION) as usize;
    let train_events = buckets[..split].concat();
    let test_events = buckets[split..].concat();
    info!(train = train_events.len(), test = test_events.len(); "events synthesized");

    let builder = SampleBuilder::new(bbox, config.grid, granularity)
        .with_history(config.history)
        .with_coverage(config.coverage);

    let train = DemandDataset::new(builder.build(&train_events), config.grid)?;
    let test = DemandDataset::new(builder.build(&test_events), config.grid)?;

    let net = DemandNet::new(config.grid, config.history, &mut rng)?;
    info!(params = net.size(), train = train.len(), test = test.len(); "training network");

    let mut train_loader = DataLoader::new(
        train,
        training_config.batch_size,
        training_config.shuffle,
        training_config.seed,
    );
    let (net, report) = training::fit(net, &mut train_loader, training_config)?;

    if let Some(loss) = report.last_loss() {
        info!(iterations = report.iterations(), loss = loss; "training finished");
    }

    let test_loader = DataLoader::new(test, training_config.batch_size, false, None);
    let evaluation = training::evaluate(&net, &test_loader)?;

    let Some(rmse) = evaluation.rmse else {
        warn!("no test samples, nothing to evaluate");
        return Ok(());
    };

    info!(samples = evaluation.predictions.len(), rmse = rmse; "evaluation finished");

    for prediction in evaluation.predictions.iter().rev().take(3) {
        let actual = test_loader
            .dataset()
            .get(prediction.index)
            .map_or(0., |sample| sample.label().sum());

        info!(
            bucket = prediction.bucket.index(),
            predicted = prediction.rounded_counts().sum(),
            actual = actual;
            "demand forecast"
        );
    }

    Ok(())
}
