use std::ops::AddAssign;

use super::{BoundingBox, DemandGrid, GridShape};

/// Counters describing how many points a rasterization kept or dropped.
///
/// Points outside the bounding box are not an error, they are just counted here so data
/// quality can be diagnosed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RasterStats {
    pub kept: usize,
    pub dropped: usize,
}

impl RasterStats {
    /// Returns the total amount of points seen.
    pub fn total(&self) -> usize {
        self.kept + self.dropped
    }
}

impl AddAssign for RasterStats {
    fn add_assign(&mut self, rhs: Self) {
        self.kept += rhs.kept;
        self.dropped += rhs.dropped;
    }
}

/// Maps `(lon, lat)` points onto the cells of a fixed grid.
#[derive(Debug, Clone, Copy)]
pub struct Rasterizer {
    bbox: BoundingBox,
    shape: GridShape,
    lon_width: f64,
    lat_width: f64,
}

impl Rasterizer {
    /// Creates a new `Rasterizer`.
    ///
    /// # Arguments
    /// * `bbox` - The spatial domain mapped onto the grid.
    /// * `shape` - The grid's shape, rows discretize longitude and columns latitude.
    pub fn new(bbox: BoundingBox, shape: GridShape) -> Self {
        Self {
            bbox,
            shape,
            lon_width: (bbox.max_lon() - bbox.min_lon()) / shape.rows() as f64,
            lat_width: (bbox.max_lat() - bbox.min_lat()) / shape.cols() as f64,
        }
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Finds the cell a point falls in.
    ///
    /// # Returns
    /// The `(row, col)` of the cell, or `None` if the point is outside the bounding box.
    pub fn cell_of(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        if !self.bbox.contains(lon, lat) {
            return None;
        }

        let row = axis_index(lon, self.bbox.min_lon(), self.lon_width, self.shape.rows());
        let col = axis_index(lat, self.bbox.min_lat(), self.lat_width, self.shape.cols());
        Some((row, col))
    }

    /// Accumulates a histogram of the given points.
    ///
    /// # Arguments
    /// * `points` - The `(lon, lat)` points to count.
    ///
    /// # Returns
    /// The demand grid and how many points were kept or dropped.
    pub fn rasterize<I>(&self, points: I) -> (DemandGrid, RasterStats)
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut grid = DemandGrid::zeros(self.shape);
        let mut stats = RasterStats::default();

        for (lon, lat) in points {
            match self.cell_of(lon, lat) {
                Some((row, col)) => {
                    grid.increment(row, col);
                    stats.kept += 1;
                }
                None => stats.dropped += 1,
            }
        }

        (grid, stats)
    }
}

/// Floor-divides the offset of an in-range coordinate by the cell width.
///
/// Rounding can push a coordinate just below the upper bound onto index `count`, it's
/// clamped back into the last cell.
fn axis_index(coord: f64, min: f64, width: f64, count: usize) -> usize {
    let idx = ((coord - min) / width).floor() as usize;
    idx.min(count - 1)
}

/// Rasterizes a batch of `(lon, lat)` points into a demand grid.
///
/// Points falling outside of `bbox` are silently dropped, use `Rasterizer::rasterize` to also
/// get the amount of dropped points.
///
/// # Arguments
/// * `points` - The points to count.
/// * `bbox` - The spatial domain mapped onto the grid.
/// * `shape` - The grid's shape.
///
/// # Returns
/// A grid where every cell holds the amount of points that fell in it.
pub fn rasterize(points: &[(f64, f64)], bbox: &BoundingBox, shape: GridShape) -> DemandGrid {
    let (grid, _) = Rasterizer::new(*bbox, shape).rasterize(points.iter().copied());
    grid
}
