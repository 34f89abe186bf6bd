use ndarray::{Array2, ArrayView2};

use super::Sample;
use crate::{DemandErr, Result, geo::GridShape};

/// An in-memory collection of samples, also laid out as two contiguous row-major matrices.
///
/// Row `i` of `xs` holds the input grids of sample `i` one after the other, row `i` of `ys` its
/// label grid.
#[derive(Debug, Clone)]
pub struct DemandDataset {
    samples: Vec<Sample>,
    shape: GridShape,
    channels: usize,
    xs: Array2<f32>,
    ys: Array2<f32>,
}

impl DemandDataset {
    /// Creates a new `DemandDataset`.
    ///
    /// # Arguments
    /// * `samples` - The samples, all with the same history length.
    /// * `shape` - The shape of every grid in the samples.
    ///
    /// # Returns
    /// An error if any grid doesn't have the given shape or the history lengths differ.
    pub fn new(samples: Vec<Sample>, shape: GridShape) -> Result<Self> {
        let channels = samples.first().map_or(1, |s| s.input().len());
        let cells = shape.len();

        let mut xs = Vec::with_capacity(samples.len() * channels * cells);
        let mut ys = Vec::with_capacity(samples.len() * cells);

        for sample in &samples {
            if sample.input().len() != channels {
                return Err(DemandErr::SizeMismatch {
                    what: "sample history",
                    got: sample.input().len(),
                    expected: channels,
                });
            }

            for grid in sample.input().iter().chain([sample.label()]) {
                if grid.shape() != shape {
                    return Err(DemandErr::SizeMismatch {
                        what: "grid cells",
                        got: grid.shape().len(),
                        expected: cells,
                    });
                }
            }

            for grid in sample.input() {
                xs.extend(grid.flat_iter());
            }

            ys.extend(sample.label().flat_iter());
        }

        let len = samples.len();

        Ok(Self {
            xs: Array2::from_shape_vec((len, channels * cells), xs)?,
            ys: Array2::from_shape_vec((len, cells), ys)?,
            samples,
            shape,
            channels,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the sample at `idx`, or `None` if out of bounds.
    pub fn get(&self, idx: usize) -> Option<&Sample> {
        self.samples.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    /// Returns the amount of grids stacked in every input.
    pub fn input_channels(&self) -> usize {
        self.channels
    }

    /// The flattened inputs, one sample per row.
    pub fn xs(&self) -> ArrayView2<'_, f32> {
        self.xs.view()
    }

    /// The flattened labels, one sample per row.
    pub fn ys(&self) -> ArrayView2<'_, f32> {
        self.ys.view()
    }
}
