use ndarray::prelude::*;

use crate::{DemandErr, Result};

/// The rectified linear unit, `max(0, x)` element wise.
#[derive(Debug, Clone)]
pub struct Relu {
    // Forward metadata
    x: Array2<f32>,
}

impl Default for Relu {
    fn default() -> Self {
        Self::new()
    }
}

impl Relu {
    pub fn new() -> Self {
        Self {
            x: Array2::zeros((0, 0)),
        }
    }

    pub fn forward(&mut self, x: ArrayView2<f32>) -> Array2<f32> {
        self.x = x.to_owned();
        self.predict(x)
    }

    pub fn predict(&self, x: ArrayView2<f32>) -> Array2<f32> {
        x.mapv(|v| v.max(0.0))
    }

    /// Zeroes the deltas of every input that wasn't positive in the last forward pass.
    pub fn backward(&self, mut d: Array2<f32>) -> Result<Array2<f32>> {
        if d.dim() != self.x.dim() {
            return Err(DemandErr::SizeMismatch {
                what: "relu deltas",
                got: d.len(),
                expected: self.x.len(),
            });
        }

        d.zip_mut_with(&self.x, |d, &x| {
            if x <= 0.0 {
                *d = 0.0;
            }
        });

        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_non_positive_inputs() {
        let mut relu = Relu::new();
        let x = array![[-1., 0., 2.], [3., -0.5, 0.1]];

        assert_eq!(relu.forward(x.view()), array![[0., 0., 2.], [3., 0., 0.1]]);

        let d = relu.backward(Array2::ones((2, 3))).unwrap();
        assert_eq!(d, array![[0., 0., 1.], [1., 0., 1.]]);
    }
}
