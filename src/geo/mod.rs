mod bbox;
mod grid;
mod raster;

pub use bbox::{BoundingBox, GridShape};
pub use grid::DemandGrid;
pub use raster::{RasterStats, Rasterizer, rasterize};
