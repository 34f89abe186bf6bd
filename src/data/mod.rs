pub mod bucket;
pub mod dataloader;
pub mod dataset;
pub mod event;
pub mod samples;

pub use bucket::{Granularity, TimeBucket};
pub use dataloader::{Batch, Batches, DataLoader, Prefetch};
pub use dataset::DemandDataset;
pub use event::Event;
pub use samples::{BucketCoverage, Sample, SampleBuilder, build_samples};
