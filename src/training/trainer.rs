use std::num::NonZeroUsize;

use log::{debug, error, info, warn};

use super::StopSignal;
use crate::{
    DemandErr, Result,
    arch::{
        Model,
        loss::{LossFn, Rmse},
    },
    config::{TrainingBound, TrainingConfig},
    data::{Batch, DataLoader},
    optimization::Optimizer,
};

/// The losses recorded while training.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainReport {
    /// The loss of every batch, before its update, in training order.
    pub batch_losses: Vec<f32>,
    /// The mean batch loss of every epoch that ran at least one batch.
    pub epoch_losses: Vec<f32>,
    /// Whether training ended because of a stop signal.
    pub stopped: bool,
}

impl TrainReport {
    /// Returns the amount of optimizer updates made.
    pub fn iterations(&self) -> usize {
        self.batch_losses.len()
    }

    pub fn last_loss(&self) -> Option<f32> {
        self.batch_losses.last().copied()
    }
}

/// A model `Trainer`. Holds the optimizer, the loss function and the stopping rules, the
/// model and its data are lent on every `fit` call.
pub struct Trainer<O, L>
where
    O: Optimizer,
    L: LossFn,
{
    optimizer: O,
    loss_fn: L,
    bound: TrainingBound,
    log_every: NonZeroUsize,
    prefetch: Option<NonZeroUsize>,
    stop: StopSignal,
}

impl<O, L> Trainer<O, L>
where
    O: Optimizer,
    L: LossFn,
{
    /// Returns a new `Trainer`.
    ///
    /// # Arguments
    /// * `optimizer` - The optimizer that dictates how to update the parameters.
    /// * `loss_fn` - The loss function used to measure the difference between a model's output and the expected one.
    /// * `bound` - When to stop training.
    pub fn new(optimizer: O, loss_fn: L, bound: TrainingBound) -> Self {
        Self {
            optimizer,
            loss_fn,
            bound,
            log_every: NonZeroUsize::MIN,
            prefetch: None,
            stop: StopSignal::new(),
        }
    }

    /// Logs the batch loss every `log_every` updates.
    pub fn with_log_every(mut self, log_every: NonZeroUsize) -> Self {
        self.log_every = log_every;
        self
    }

    /// Builds up to `depth` batches ahead on a background thread.
    pub fn with_prefetch(mut self, depth: Option<NonZeroUsize>) -> Self {
        self.prefetch = depth;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Returns a handle that stops this trainer between two batches.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Trains the model until the bound is reached or the stop signal is raised.
    ///
    /// Every batch goes through a forward pass, the loss, a backward pass and an optimizer
    /// step. An empty loader makes no updates.
    ///
    /// # Arguments
    /// * `model` - The model to train, its parameters are updated in place.
    /// * `loader` - The batches, a new epoch is drawn from it every pass.
    ///
    /// # Returns
    /// The recorded losses, or an error if a batch doesn't fit the model or the loss stops
    /// being finite.
    pub fn fit<M: Model>(&mut self, model: &mut M, loader: &mut DataLoader) -> Result<TrainReport> {
        let mut report = TrainReport::default();

        if loader.is_empty() {
            warn!("the data loader is empty, skipping training");
            return Ok(report);
        }

        let (max_epochs, max_iterations) = match self.bound {
            TrainingBound::Epochs(n) => (Some(n.get()), None),
            TrainingBound::Iterations(n) => (None, Some(n.get())),
        };

        let mut epoch = 0;
        let mut done = false;

        while !done && max_epochs.is_none_or(|n| epoch < n) {
            let batches: Box<dyn Iterator<Item = Batch> + '_> = match self.prefetch {
                Some(depth) => Box::new(loader.prefetch(depth)),
                None => Box::new(loader.batches()),
            };

            let mut epoch_loss = 0.;
            let mut epoch_batches = 0;

            for batch in batches {
                if self.stop.is_stopped() {
                    info!(epoch = epoch, iterations = report.iterations(); "stop signal received");
                    report.stopped = true;
                    done = true;
                    break;
                }

                let result = model
                    .backprop(
                        &mut self.optimizer,
                        &self.loss_fn,
                        batch.x.view(),
                        batch.y.view(),
                    )
                    .and_then(|loss| {
                        if loss.is_finite() {
                            Ok(loss)
                        } else {
                            Err(DemandErr::NonFiniteLoss { loss })
                        }
                    });

                if let Err(DemandErr::NonFiniteLoss { loss }) = result {
                    error!(epoch = epoch, iteration = report.iterations(), loss = loss; "the loss diverged");
                }

                let loss = result?;

                report.batch_losses.push(loss);
                epoch_loss += loss;
                epoch_batches += 1;

                if report.iterations() % self.log_every.get() == 0 {
                    info!(epoch = epoch, iteration = report.iterations(), loss = loss; "batch trained");
                } else {
                    debug!(epoch = epoch, iteration = report.iterations(), loss = loss; "batch trained");
                }

                if max_iterations.is_some_and(|n| report.iterations() >= n) {
                    done = true;
                    break;
                }
            }

            if epoch_batches > 0 {
                let mean = epoch_loss / epoch_batches as f32;
                report.epoch_losses.push(mean);
                info!(epoch = epoch, batches = epoch_batches, loss = mean; "epoch finished");
            }

            epoch += 1;
        }

        Ok(report)
    }
}

/// Trains a model with the RMSE loss and the configured optimizer and bound.
///
/// # Arguments
/// * `model` - The model to train.
/// * `loader` - The training batches.
/// * `config` - The training hyperparameters.
///
/// # Returns
/// The trained model alongside the recorded losses.
pub fn fit<M: Model>(
    mut model: M,
    loader: &mut DataLoader,
    config: &TrainingConfig,
) -> Result<(M, TrainReport)> {
    let optimizer = config.optimizer.build(model.size());
    let mut trainer = Trainer::new(optimizer, Rmse, config.bound)
        .with_log_every(config.log_every)
        .with_prefetch(config.prefetch);

    let report = trainer.fit(&mut model, loader)?;
    Ok((model, report))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        arch::DemandNet,
        config::OptimizerConfig,
        data::{DemandDataset, Event, build_samples},
        geo::{BoundingBox, GridShape},
    };

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn shape() -> GridShape {
        GridShape::from_dims(8, 8).unwrap()
    }

    /// `n_buckets` ten minute buckets over an 8x8 box, each with a few events.
    fn dataset(n_buckets: i64) -> DemandDataset {
        let bbox = BoundingBox::new(0.0, 8.0, 0.0, 8.0).unwrap();
        let t0 = Utc.with_ymd_and_hms(2019, 5, 1, 8, 0, 0).unwrap();

        let events: Vec<_> = (0..n_buckets)
            .flat_map(|i| {
                let ts = t0 + TimeDelta::minutes(i * 10);
                (0..3).map(move |j| Event::new(1.5 + (i % 3) as f64, 2.5 + j as f64, ts))
            })
            .collect();

        let samples = build_samples(&events, TimeDelta::minutes(10), &bbox, shape()).unwrap();
        DemandDataset::new(samples, shape()).unwrap()
    }

    fn net(seed: u64) -> DemandNet {
        DemandNet::new(shape(), nz(1), &mut StdRng::seed_from_u64(seed)).unwrap()
    }

    fn trainer(bound: TrainingBound) -> Trainer<crate::optimization::Adam, Rmse> {
        let n = net(0).size();
        Trainer::new(OptimizerConfig::default().build(n), Rmse, bound)
    }

    #[test]
    fn epoch_bound_runs_every_batch_of_every_epoch() {
        let mut model = net(0);
        let mut loader = DataLoader::new(dataset(8), nz(3), true, Some(1));

        let report = trainer(TrainingBound::Epochs(nz(2)))
            .fit(&mut model, &mut loader)
            .unwrap();

        assert_eq!(report.iterations(), 2 * 3);
        assert_eq!(report.epoch_losses.len(), 2);
        assert!(!report.stopped);
        assert!(report.batch_losses.iter().all(|l| l.is_finite() && *l >= 0.));
    }

    #[test]
    fn iteration_bound_caps_the_updates_across_epochs() {
        let mut model = net(0);
        let mut loader = DataLoader::new(dataset(8), nz(3), false, None);

        let report = trainer(TrainingBound::Iterations(nz(7)))
            .fit(&mut model, &mut loader)
            .unwrap();

        assert_eq!(report.iterations(), 7);
        assert_eq!(report.epoch_losses.len(), 3);
    }

    #[test]
    fn empty_loaders_make_no_updates() {
        let mut model = net(0);
        let before = model.params().to_vec();
        let mut loader = DataLoader::new(dataset(1), nz(3), true, None);

        let report = trainer(TrainingBound::Epochs(nz(5)))
            .fit(&mut model, &mut loader)
            .unwrap();

        assert_eq!(report, TrainReport::default());
        assert_eq!(model.params(), &before[..]);
    }

    #[test]
    fn a_raised_stop_signal_halts_before_the_next_batch() {
        let mut model = net(0);
        let before = model.params().to_vec();
        let mut loader = DataLoader::new(dataset(8), nz(2), false, None);

        let mut trainer = trainer(TrainingBound::Epochs(nz(3)));
        trainer.stop_signal().stop();
        let report = trainer.fit(&mut model, &mut loader).unwrap();

        assert!(report.stopped);
        assert_eq!(report.iterations(), 0);
        assert_eq!(model.params(), &before[..]);
    }

    /// Reports a non finite loss without checking it.
    struct Diverging;

    impl Model for Diverging {
        fn size(&self) -> usize {
            0
        }

        fn params(&self) -> &[f32] {
            &[]
        }

        fn predict(&self, x: ndarray::ArrayView2<f32>) -> Result<ndarray::Array2<f32>> {
            Ok(x.to_owned())
        }

        fn backprop<O: Optimizer, L: LossFn>(
            &mut self,
            _: &mut O,
            _: &L,
            _: ndarray::ArrayView2<f32>,
            _: ndarray::ArrayView2<f32>,
        ) -> Result<f32> {
            Ok(f32::NAN)
        }
    }

    #[test]
    fn non_finite_losses_abort_training() {
        let mut loader = DataLoader::new(dataset(8), nz(3), false, None);
        let err = trainer(TrainingBound::Epochs(nz(2)))
            .fit(&mut Diverging, &mut loader)
            .unwrap_err();

        assert!(matches!(err, DemandErr::NonFiniteLoss { loss } if loss.is_nan()));
    }

    #[test]
    fn prefetching_trains_identically() {
        let mut inline_model = net(3);
        let mut prefetch_model = net(3);
        let mut inline_loader = DataLoader::new(dataset(10), nz(2), true, Some(5));
        let mut prefetch_loader = DataLoader::new(dataset(10), nz(2), true, Some(5));

        let inline = trainer(TrainingBound::Epochs(nz(2)))
            .fit(&mut inline_model, &mut inline_loader)
            .unwrap();
        let prefetched = trainer(TrainingBound::Epochs(nz(2)))
            .with_prefetch(Some(nz(2)))
            .fit(&mut prefetch_model, &mut prefetch_loader)
            .unwrap();

        assert_eq!(inline, prefetched);
        assert_eq!(inline_model.params(), prefetch_model.params());
    }

    #[test]
    fn training_lowers_the_loss_on_a_repeating_pattern() {
        let mut loader = DataLoader::new(dataset(4), nz(3), false, None);
        let config = TrainingConfig {
            bound: TrainingBound::Epochs(nz(60)),
            ..Default::default()
        };

        let (model, report) = fit(net(2), &mut loader, &config).unwrap();

        let first = report.epoch_losses[0];
        let last = *report.epoch_losses.last().unwrap();
        assert!(last < first, "{last} >= {first}");
        assert_ne!(model.params(), net(2).params());
    }
}
