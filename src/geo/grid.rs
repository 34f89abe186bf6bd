use ndarray::{Array2, ArrayView2};

use super::GridShape;
use crate::{DemandErr, Result};

/// A rows×cols matrix of demand values in row-major layout.
///
/// Out of the rasterizer each cell holds the raw count of events that fell in it.
#[derive(Debug, Clone, PartialEq)]
pub struct DemandGrid {
    shape: GridShape,
    cells: Array2<f32>,
}

impl DemandGrid {
    /// Creates an all-zero grid.
    pub fn zeros(shape: GridShape) -> Self {
        Self {
            shape,
            cells: Array2::zeros(shape.dims()),
        }
    }

    /// Creates a grid from a flat row-major buffer.
    ///
    /// # Arguments
    /// * `shape` - The grid's shape.
    /// * `values` - `rows * cols` values in row-major order.
    ///
    /// # Returns
    /// An error if the buffer length doesn't match the shape.
    pub fn from_flat(shape: GridShape, values: Vec<f32>) -> Result<Self> {
        if values.len() != shape.len() {
            return Err(DemandErr::SizeMismatch {
                what: "grid cells",
                got: values.len(),
                expected: shape.len(),
            });
        }

        let cells = Array2::from_shape_vec(shape.dims(), values)?;
        Ok(Self { shape, cells })
    }

    /// Returns this grid's shape.
    pub fn shape(&self) -> GridShape {
        self.shape
    }

    /// Returns the value of a cell, or `None` if it's out of bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        self.cells.get((row, col)).copied()
    }

    /// Returns the total demand of the grid.
    pub fn sum(&self) -> f32 {
        self.cells.sum()
    }

    /// Returns whether every cell is zero.
    pub fn is_all_zero(&self) -> bool {
        self.cells.iter().all(|&c| c == 0.0)
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.cells.view()
    }

    /// Iterates over the cells in row-major order.
    pub fn flat_iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.cells.iter().copied()
    }

    /// Copies the cells into a flat row-major buffer.
    pub fn to_flat(&self) -> Vec<f32> {
        self.flat_iter().collect()
    }

    /// Returns a new grid with `ln(1 + x)` applied to every cell.
    ///
    /// Callers that want log-scaled counts as network inputs apply this themselves, the
    /// rasterizer never normalizes.
    pub fn log1p(&self) -> Self {
        self.map(f32::ln_1p)
    }

    /// Returns a new grid with `f` applied to every cell.
    pub fn map<F>(&self, f: F) -> Self
    where
        F: FnMut(f32) -> f32,
    {
        Self {
            shape: self.shape,
            cells: self.cells.mapv(f),
        }
    }

    pub(crate) fn increment(&mut self, row: usize, col: usize) {
        self.cells[(row, col)] += 1.0;
    }
}
