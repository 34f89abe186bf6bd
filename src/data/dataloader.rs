use std::{
    num::NonZeroUsize,
    panic,
    sync::{
        Arc,
        mpsc::{self, Receiver},
    },
    thread::{self, JoinHandle},
};

use log::error;
use ndarray::{Array2, Axis};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::DemandDataset;

/// A batch of flattened inputs and labels, one sample per row.
#[derive(Debug, Clone)]
pub struct Batch {
    pub x: Array2<f32>,
    pub y: Array2<f32>,
    /// The dataset index of every row.
    pub indices: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Produces batches out of a dataset, optionally shuffled.
///
/// The last batch of an epoch is smaller when the dataset length is not a multiple of the
/// batch size, it's never dropped.
#[derive(Debug)]
pub struct DataLoader {
    dataset: Arc<DemandDataset>,
    batch_size: NonZeroUsize,
    shuffle: bool,
    seed: Option<u64>,
    rng: StdRng,
    epoch: u64,
}

impl DataLoader {
    /// Creates a new `DataLoader`.
    ///
    /// # Arguments
    /// * `dataset` - The samples to batch.
    /// * `batch_size` - The maximum amount of samples per batch.
    /// * `shuffle` - Whether to draw a new permutation for every epoch.
    /// * `seed` - Makes the permutation of epoch `e` depend only on `seed` and `e`.
    pub fn new(
        dataset: DemandDataset,
        batch_size: NonZeroUsize,
        shuffle: bool,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            dataset: Arc::new(dataset),
            batch_size,
            shuffle,
            seed,
            rng,
            epoch: 0,
        }
    }

    pub fn dataset(&self) -> &DemandDataset {
        &self.dataset
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn batch_size(&self) -> NonZeroUsize {
        self.batch_size
    }

    /// Returns the amount of batches in an epoch.
    pub fn num_batches(&self) -> usize {
        self.len().div_ceil(self.batch_size.get())
    }

    /// Starts a new epoch.
    ///
    /// # Returns
    /// An iterator over the epoch's batches.
    pub fn batches(&mut self) -> Batches<'_> {
        let order = self.next_order();
        Batches::new(&self.dataset, order, self.batch_size)
    }

    /// Iterates over the dataset in its original order, ignoring the shuffle setting.
    ///
    /// Doesn't start a new epoch.
    pub fn in_order(&self) -> Batches<'_> {
        let order = (0..self.len()).collect();
        Batches::new(&self.dataset, order, self.batch_size)
    }

    /// Starts a new epoch whose batches are built on a background thread.
    ///
    /// # Arguments
    /// * `depth` - The maximum amount of ready batches waiting to be consumed.
    ///
    /// # Returns
    /// An iterator yielding the same batches `batches` would have.
    pub fn prefetch(&mut self, depth: NonZeroUsize) -> Prefetch {
        let order = self.next_order();
        let dataset = Arc::clone(&self.dataset);
        let batch_size = self.batch_size;
        let (tx, rx) = mpsc::sync_channel(depth.get());

        let handle = thread::spawn(move || {
            for batch in Batches::new(&dataset, order, batch_size) {
                if tx.send(batch).is_err() {
                    break;
                }
            }
        });

        Prefetch {
            rx: Some(rx),
            handle: Some(handle),
        }
    }

    fn next_order(&mut self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();

        if self.shuffle {
            match self.seed {
                Some(seed) => {
                    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(self.epoch));
                    order.shuffle(&mut rng);
                }
                None => order.shuffle(&mut self.rng),
            }
        }

        self.epoch += 1;
        order
    }
}

/// The batches of a single epoch.
pub struct Batches<'a> {
    dataset: &'a DemandDataset,
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl<'a> Batches<'a> {
    fn new(dataset: &'a DemandDataset, order: Vec<usize>, batch_size: NonZeroUsize) -> Self {
        Self {
            dataset,
            order,
            batch_size: batch_size.get(),
            cursor: 0,
        }
    }
}

impl Iterator for Batches<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = self.order[self.cursor..end].to_vec();
        self.cursor = end;

        Some(Batch {
            x: self.dataset.xs().select(Axis(0), &indices),
            y: self.dataset.ys().select(Axis(0), &indices),
            indices,
        })
    }
}

/// Batches produced by a background thread through a bounded channel.
///
/// A panic in the producer is raised again on the consuming thread once the channel runs dry.
pub struct Prefetch {
    rx: Option<Receiver<Batch>>,
    handle: Option<JoinHandle<()>>,
}

impl Iterator for Prefetch {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        if let Ok(batch) = self.rx.as_ref()?.recv() {
            return Some(batch);
        }

        self.rx = None;

        if let Some(handle) = self.handle.take()
            && let Err(payload) = handle.join()
        {
            panic::resume_unwind(payload);
        }

        None
    }
}

impl Drop for Prefetch {
    fn drop(&mut self) {
        // The producer is blocked on a full channel until the receiver goes away.
        drop(self.rx.take());

        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("the batch prefetching thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};

    use super::*;
    use crate::{
        data::{Event, build_samples},
        geo::{BoundingBox, GridShape},
    };

    fn dataset(n_buckets: i64) -> DemandDataset {
        let bbox = BoundingBox::new(0.0, 10.0, 0.0, 10.0).unwrap();
        let shape = GridShape::from_dims(2, 2).unwrap();
        let t0 = Utc.with_ymd_and_hms(2019, 5, 1, 8, 0, 0).unwrap();
        let events: Vec<_> = (0..n_buckets)
            .map(|i| Event::new(1.0, 1.0, t0 + TimeDelta::minutes(i * 10)))
            .collect();

        let samples = build_samples(&events, TimeDelta::minutes(10), &bbox, shape).unwrap();
        DemandDataset::new(samples, shape).unwrap()
    }

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn epoch_indices<I: Iterator<Item = Batch>>(batches: I) -> Vec<Vec<usize>> {
        batches.map(|b| b.indices).collect()
    }

    #[test]
    fn final_partial_batch_is_kept() {
        let mut dl = DataLoader::new(dataset(8), nz(3), false, None);

        assert_eq!(dl.len(), 7);
        assert_eq!(dl.num_batches(), 3);

        let sizes: Vec<_> = dl.batches().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn unshuffled_batches_follow_dataset_order() {
        let mut dl = DataLoader::new(dataset(6), nz(2), false, None);
        let indices = epoch_indices(dl.batches());

        assert_eq!(indices, vec![vec![0, 1], vec![2, 3], vec![4]]);

        let batch = dl.in_order().next().unwrap();
        assert_eq!(batch.x.dim(), (2, 4));
        assert_eq!(batch.y.dim(), (2, 4));
    }

    #[test]
    fn shuffled_epochs_cover_every_sample_once() {
        let mut dl = DataLoader::new(dataset(21), nz(4), true, Some(3));
        let mut seen: Vec<_> = epoch_indices(dl.batches()).concat();
        seen.sort_unstable();

        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn seeded_shuffles_are_reproducible_per_epoch() {
        let mut a = DataLoader::new(dataset(21), nz(4), true, Some(42));
        let mut b = DataLoader::new(dataset(21), nz(4), true, Some(42));

        let a0 = epoch_indices(a.batches());
        let a1 = epoch_indices(a.batches());

        assert_eq!(a0, epoch_indices(b.batches()));
        assert_eq!(a1, epoch_indices(b.batches()));
        assert_ne!(a0, a1);
    }

    #[test]
    fn prefetch_yields_the_same_batches() {
        let mut a = DataLoader::new(dataset(21), nz(4), true, Some(9));
        let mut b = DataLoader::new(dataset(21), nz(4), true, Some(9));

        let direct: Vec<_> = a.batches().collect();
        let prefetched: Vec<_> = b.prefetch(nz(2)).collect();

        assert_eq!(direct.len(), prefetched.len());

        for (d, p) in direct.iter().zip(&prefetched) {
            assert_eq!(d.indices, p.indices);
            assert_eq!(d.x, p.x);
            assert_eq!(d.y, p.y);
        }
    }

    #[test]
    fn dropping_a_prefetch_early_does_not_hang() {
        let mut dl = DataLoader::new(dataset(40), nz(1), false, None);
        let mut prefetch = dl.prefetch(nz(1));

        assert!(prefetch.next().is_some());
        drop(prefetch);

        assert_eq!(dl.batches().count(), 39);
    }

    #[test]
    #[should_panic(expected = "failed to build a batch")]
    fn producer_panics_reach_the_consumer() {
        let (tx, rx) = mpsc::sync_channel(1);
        let handle = thread::spawn(move || {
            let batch = Batch {
                x: Array2::zeros((1, 4)),
                y: Array2::zeros((1, 4)),
                indices: vec![0],
            };

            tx.send(batch).ok();
            panic!("failed to build a batch");
        });

        let prefetch = Prefetch {
            rx: Some(rx),
            handle: Some(handle),
        };

        prefetch.for_each(drop);
    }
}
