use std::{
    fs,
    num::{NonZeroU64, NonZeroUsize},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    DemandErr, Result,
    data::{BucketCoverage, Granularity},
    geo::GridShape,
    optimization::Adam,
};

const DEFAULT_GRANULARITY_SECS: NonZeroU64 = NonZeroU64::new(600).unwrap();
const DEFAULT_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(5).unwrap();
const DEFAULT_EPOCHS: NonZeroUsize = NonZeroUsize::new(2).unwrap();
const DEFAULT_LOG_EVERY: NonZeroUsize = NonZeroUsize::new(10).unwrap();

/// The optimizer used to update the network's parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerConfig {
    Adam { lr: f32, b1: f32, b2: f32, eps: f32 },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam {
            lr: 0.01,
            b1: 0.9,
            b2: 0.999,
            eps: 1e-8,
        }
    }
}

impl OptimizerConfig {
    /// Builds the optimizer for a model with `len` parameters.
    pub fn build(&self, len: usize) -> Adam {
        match *self {
            Self::Adam { lr, b1, b2, eps } => Adam::new(len, lr, b1, b2, eps),
        }
    }

    fn validate(&self) -> Result<()> {
        let Self::Adam { lr, b1, b2, eps } = *self;

        if !(lr.is_finite() && lr > 0.) {
            return Err(DemandErr::InvalidConfig(format!(
                "the learning rate must be positive, got {lr}"
            )));
        }

        for (name, beta) in [("b1", b1), ("b2", b2)] {
            if !(0. ..1.).contains(&beta) {
                return Err(DemandErr::InvalidConfig(format!(
                    "adam's {name} must be in [0, 1), got {beta}"
                )));
            }
        }

        if !(eps.is_finite() && eps > 0.) {
            return Err(DemandErr::InvalidConfig(format!(
                "adam's eps must be positive, got {eps}"
            )));
        }

        Ok(())
    }
}

/// When training stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingBound {
    /// Full passes over the loader.
    Epochs(NonZeroUsize),
    /// Optimizer updates, crossing epoch boundaries as needed.
    Iterations(NonZeroUsize),
}

impl Default for TrainingBound {
    fn default() -> Self {
        Self::Epochs(DEFAULT_EPOCHS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub batch_size: NonZeroUsize,
    pub bound: TrainingBound,
    pub optimizer: OptimizerConfig,
    /// Logs the batch loss every `log_every` optimizer updates.
    pub log_every: NonZeroUsize,
    pub seed: Option<u64>,
    pub shuffle: bool,
    /// How many batches to build ahead on a background thread, `None` builds them inline.
    pub prefetch: Option<NonZeroUsize>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            bound: TrainingBound::default(),
            optimizer: OptimizerConfig::default(),
            log_every: DEFAULT_LOG_EVERY,
            seed: None,
            shuffle: true,
            prefetch: None,
        }
    }
}

/// The whole configuration of a forecasting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemandConfig {
    pub grid: GridShape,
    pub granularity_secs: NonZeroU64,
    /// The amount of consecutive grids every sample's input holds.
    pub history: NonZeroUsize,
    pub coverage: BucketCoverage,
    pub training: TrainingConfig,
}

impl Default for DemandConfig {
    fn default() -> Self {
        Self {
            grid: GridShape::default(),
            granularity_secs: DEFAULT_GRANULARITY_SECS,
            history: NonZeroUsize::MIN,
            coverage: BucketCoverage::default(),
            training: TrainingConfig::default(),
        }
    }
}

impl DemandConfig {
    /// Parses and validates a JSON configuration, missing fields take their default value.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks the values serde can't, like the optimizer hyperparameters.
    pub fn validate(&self) -> Result<()> {
        self.training.optimizer.validate()?;
        self.granularity()?;

        if let BucketCoverage::Contiguous {
            start: Some(start),
            end: Some(end),
        } = self.coverage
            && start > end
        {
            return Err(DemandErr::InvalidConfig(format!(
                "the coverage starts at {start} after it ends at {end}"
            )));
        }

        Ok(())
    }

    pub fn granularity(&self) -> Result<Granularity> {
        Granularity::from_secs(self.granularity_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn defaults_follow_the_reference_scripts() {
        let config = DemandConfig::default();

        assert_eq!(config.grid.dims(), (25, 25));
        assert_eq!(config.granularity_secs.get(), 600);
        assert_eq!(config.history.get(), 1);
        assert_eq!(config.training.batch_size.get(), 5);
        assert_eq!(config.training.bound, TrainingBound::Epochs(nz(2)));
        assert_eq!(
            config.training.optimizer,
            OptimizerConfig::Adam {
                lr: 0.01,
                b1: 0.9,
                b2: 0.999,
                eps: 1e-8
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn json_round_trip_of_defaults() {
        let config = DemandConfig::default();
        let json = config.to_json().unwrap();

        assert_eq!(DemandConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let json = r#"{
            "grid": { "rows": 212, "cols": 219 },
            "training": { "bound": { "iterations": 50 }, "seed": 7 }
        }"#;
        let config = DemandConfig::from_json(json).unwrap();

        assert_eq!(config.grid.dims(), (212, 219));
        assert_eq!(config.training.bound, TrainingBound::Iterations(nz(50)));
        assert_eq!(config.training.seed, Some(7));
        assert_eq!(config.training.batch_size.get(), 5);
        assert_eq!(
            config.coverage,
            BucketCoverage::Contiguous {
                start: None,
                end: None
            }
        );
    }

    #[test]
    fn contiguous_coverage_parses() {
        let json = r#"{ "coverage": { "contiguous": { "start": null, "end": "2019-05-01T08:20:00Z" } } }"#;
        let config = DemandConfig::from_json(json).unwrap();

        assert!(matches!(
            config.coverage,
            BucketCoverage::Contiguous {
                start: None,
                end: Some(_)
            }
        ));
    }

    #[test]
    fn observed_coverage_is_opt_in() {
        let config = DemandConfig::from_json(r#"{ "coverage": "observed" }"#).unwrap();
        assert_eq!(config.coverage, BucketCoverage::Observed);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(DemandConfig::from_json(r#"{ "granularity_secs": 0 }"#).is_err());
        assert!(DemandConfig::from_json(r#"{ "grid": { "rows": 0, "cols": 3 } }"#).is_err());

        let bad_lr = r#"{ "training": { "optimizer": { "adam": { "lr": -1, "b1": 0.9, "b2": 0.999, "eps": 1e-8 } } } }"#;
        assert!(matches!(
            DemandConfig::from_json(bad_lr),
            Err(DemandErr::InvalidConfig(_))
        ));

        let bad_beta = r#"{ "training": { "optimizer": { "adam": { "lr": 0.1, "b1": 1.0, "b2": 0.999, "eps": 1e-8 } } } }"#;
        assert!(DemandConfig::from_json(bad_beta).is_err());
    }
}
