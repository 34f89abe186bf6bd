use ndarray::{Array2, ArrayView2};

use super::{Conv2d, ConvGeometry, Dense, Relu};
use crate::Result;

/// The building blocks of a sequential network.
///
/// Every layer reads and writes its own slice of the network's flat parameter and gradient
/// buffers.
#[derive(Debug, Clone)]
pub enum Layer {
    Conv2d(Conv2d),
    Dense(Dense),
    Relu(Relu),
}

use Layer::*;

impl Layer {
    pub fn conv2d(geometry: ConvGeometry) -> Self {
        Self::Conv2d(Conv2d::new(geometry))
    }

    pub fn dense(dim: (usize, usize)) -> Self {
        Self::Dense(Dense::new(dim))
    }

    pub fn relu() -> Self {
        Self::Relu(Relu::new())
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        match self {
            Conv2d(l) => l.size(),
            Dense(l) => l.size(),
            Relu(_) => 0,
        }
    }

    /// Returns the amount of inputs each output unit sees, `None` for parameterless layers.
    pub fn fan_in(&self) -> Option<usize> {
        match self {
            Conv2d(l) => Some(l.geometry().receptive_field()),
            Dense(l) => Some(l.dim().0),
            Relu(_) => None,
        }
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            Conv2d(l) => l.forward(params, x),
            Dense(l) => l.forward(params, x),
            Relu(l) => Ok(l.forward(x)),
        }
    }

    pub fn predict(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        match self {
            Conv2d(l) => l.predict(params, x),
            Dense(l) => l.predict(params, x),
            Relu(l) => Ok(l.predict(x)),
        }
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        match self {
            Conv2d(l) => l.backward(params, grad, d),
            Dense(l) => l.backward(params, grad, d),
            Relu(l) => l.backward(d),
        }
    }
}
