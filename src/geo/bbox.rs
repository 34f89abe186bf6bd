use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

use crate::{DemandErr, Result};

/// The rectangular geographic extent mapped onto a grid.
///
/// The longitude range is discretized by the grid's rows and the latitude range by its columns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    min_lon: f64,
    max_lon: f64,
    min_lat: f64,
    max_lat: f64,
}

impl BoundingBox {
    /// Creates a new `BoundingBox`.
    ///
    /// # Arguments
    /// * `min_lon`, `max_lon` - The longitude range.
    /// * `min_lat`, `max_lat` - The latitude range.
    ///
    /// # Returns
    /// An error if any bound is not finite or if `min >= max` on either axis.
    pub fn new(min_lon: f64, max_lon: f64, min_lat: f64, max_lat: f64) -> Result<Self> {
        let bounds = [min_lon, max_lon, min_lat, max_lat];

        if bounds.iter().any(|b| !b.is_finite()) || min_lon >= max_lon || min_lat >= max_lat {
            return Err(DemandErr::InvalidBoundingBox {
                min_lon,
                max_lon,
                min_lat,
                max_lat,
            });
        }

        Ok(Self {
            min_lon,
            max_lon,
            min_lat,
            max_lat,
        })
    }

    /// Creates the smallest `BoundingBox` enclosing every vertex of a polygon ring.
    ///
    /// # Arguments
    /// * `vertices` - The `(lon, lat)` vertices of the polygon.
    ///
    /// # Returns
    /// An error if there are no vertices or the enclosing rectangle is degenerate.
    pub fn enclosing<I>(vertices: I) -> Result<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let init = (
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
        );

        let (min_lon, max_lon, min_lat, max_lat) =
            vertices
                .into_iter()
                .fold(init, |(min_lon, max_lon, min_lat, max_lat), (lon, lat)| {
                    (
                        min_lon.min(lon),
                        max_lon.max(lon),
                        min_lat.min(lat),
                        max_lat.max(lat),
                    )
                });

        Self::new(min_lon, max_lon, min_lat, max_lat)
    }

    pub fn min_lon(&self) -> f64 {
        self.min_lon
    }

    pub fn max_lon(&self) -> f64 {
        self.max_lon
    }

    pub fn min_lat(&self) -> f64 {
        self.min_lat
    }

    pub fn max_lat(&self) -> f64 {
        self.max_lat
    }

    /// Returns whether the point lies in the half open box `[min, max)` on both axes.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.min_lon..self.max_lon).contains(&lon) && (self.min_lat..self.max_lat).contains(&lat)
    }
}

/// The fixed cell layout of every grid in a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridShape {
    rows: NonZeroUsize,
    cols: NonZeroUsize,
}

impl GridShape {
    /// Creates a new `GridShape`.
    pub fn new(rows: NonZeroUsize, cols: NonZeroUsize) -> Self {
        Self { rows, cols }
    }

    /// Creates a new `GridShape` from plain dimensions.
    ///
    /// # Returns
    /// An error if any of the dimensions is zero.
    pub fn from_dims(rows: usize, cols: usize) -> Result<Self> {
        let zero_dim =
            || DemandErr::InvalidConfig(format!("grid shape {rows}x{cols} has a zero dimension"));

        Ok(Self {
            rows: NonZeroUsize::new(rows).ok_or_else(zero_dim)?,
            cols: NonZeroUsize::new(cols).ok_or_else(zero_dim)?,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows.get()
    }

    pub fn cols(&self) -> usize {
        self.cols.get()
    }

    /// Returns the dimensions as a `(rows, cols)` tuple.
    pub fn dims(&self) -> (usize, usize) {
        (self.rows(), self.cols())
    }

    /// Returns the amount of cells in the grid.
    pub fn len(&self) -> usize {
        self.rows() * self.cols()
    }
}

const DEFAULT_SIDE: NonZeroUsize = NonZeroUsize::new(25).unwrap();

impl Default for GridShape {
    fn default() -> Self {
        Self::new(DEFAULT_SIDE, DEFAULT_SIDE)
    }
}
