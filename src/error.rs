use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use ndarray::ShapeError;
use rand::distr::uniform;

/// The result type used in the entire demand forecasting crate.
pub type Result<T> = std::result::Result<T, DemandErr>;

/// The demand forecasting crate's error type.
#[derive(Debug)]
pub enum DemandErr {
    /// The grid shape is too small for the fixed convolutional stack.
    GridTooSmall {
        axis: &'static str,
        size: isize,
        layer: &'static str,
    },
    InvalidBoundingBox {
        min_lon: f64,
        max_lon: f64,
        min_lat: f64,
        max_lat: f64,
    },
    InvalidGranularity,
    InvalidConfig(String),
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    NonFiniteLoss {
        loss: f32,
    },
    WeightInit(uniform::Error),
    Shape(ShapeError),
    Json(serde_json::Error),
    Io(io::Error),
}

impl Display for DemandErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DemandErr::GridTooSmall { axis, size, layer } => write!(
                f,
                "the grid is too small along the {axis} axis, it shrinks to {size} cells after {layer}"
            ),
            DemandErr::InvalidBoundingBox {
                min_lon,
                max_lon,
                min_lat,
                max_lat,
            } => write!(
                f,
                "invalid bounding box, expected finite bounds with min < max on both axes, got lon [{min_lon}, {max_lon}] lat [{min_lat}, {max_lat}]"
            ),
            DemandErr::InvalidGranularity => {
                write!(f, "the time bucket granularity must be a positive duration")
            }
            DemandErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            DemandErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch for {what}, got {got} and expected {expected}"
            ),
            DemandErr::NonFiniteLoss { loss } => {
                write!(f, "the loss stopped being finite, got {loss}")
            }
            DemandErr::WeightInit(e) => write!(f, "failed to initialize the weights: {e}"),
            DemandErr::Shape(e) => write!(f, "shape error: {e}"),
            DemandErr::Json(e) => write!(f, "json error: {e}"),
            DemandErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for DemandErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DemandErr::WeightInit(e) => Some(e),
            DemandErr::Shape(e) => Some(e),
            DemandErr::Json(e) => Some(e),
            DemandErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for DemandErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<uniform::Error> for DemandErr {
    fn from(value: uniform::Error) -> Self {
        Self::WeightInit(value)
    }
}

impl From<serde_json::Error> for DemandErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<io::Error> for DemandErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
