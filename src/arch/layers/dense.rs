use ndarray::{linalg, prelude::*};

use crate::{DemandErr, Result};

/// A fully connected layer without activation, `z = x · w + b`.
///
/// Its parameters are laid out as the `(in, out)` weight matrix in row-major order followed
/// by the `out` biases.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    size: usize,

    // Forward metadata
    x: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The `(in, out)` amount of units.
    pub fn new(dim: (usize, usize)) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            x: Array2::zeros((0, dim.0)),
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Makes a forward pass and keeps the input for the backward pass.
    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let z = self.predict(params, x)?;
        self.x = x.to_owned();
        Ok(z)
    }

    /// Makes a forward pass without keeping any metadata.
    pub fn predict(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.dim.0 {
            return Err(DemandErr::SizeMismatch {
                what: "dense input",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let (w, b) = self.view_params(params)?;
        let mut z = Array2::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        z += &b;

        Ok(z)
    }

    /// Writes this layer's gradient and propagates the deltas to the previous layer.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `grad` - This layer's gradient slice, overwritten.
    /// * `d` - The loss derivative with respect to this layer's output.
    ///
    /// # Returns
    /// The loss derivative with respect to this layer's input.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        if d.dim() != (self.x.nrows(), self.dim.1) {
            return Err(DemandErr::SizeMismatch {
                what: "dense deltas",
                got: d.len(),
                expected: self.x.nrows() * self.dim.1,
            });
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &self.x.t(), &d, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        let mut dx = Array2::zeros((d.nrows(), self.dim.0));
        linalg::general_mat_mul(1.0, &d, &w.t(), 0.0, &mut dx);

        Ok(dx)
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        self.check_len("dense gradient", grad.len())?;

        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        self.check_len("dense parameters", params.len())?;

        let w_size = self.size - self.dim.1;
        let (w_raw, b_raw) = params.split_at(w_size);
        let w = ArrayView2::from_shape(self.dim, w_raw)?;
        let b = ArrayView1::from_shape(self.dim.1, b_raw)?;
        Ok((w, b))
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        if got != self.size {
            return Err(DemandErr::SizeMismatch {
                what,
                got,
                expected: self.size,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_is_an_affine_map() {
        let dense = Dense::new((2, 3));
        // w = [[1, 2, 3], [4, 5, 6]], b = [0.5, 0, -1]
        let params = [1., 2., 3., 4., 5., 6., 0.5, 0., -1.];
        let x = array![[1., 1.], [0., 2.]];

        let z = dense.predict(&params, x.view()).unwrap();
        assert_eq!(z, array![[5.5, 7., 8.], [8.5, 10., 11.]]);
    }

    #[test]
    fn backward_gradients() {
        let mut dense = Dense::new((2, 1));
        let params = [2., -1., 0.5];
        let mut grad = [0.; 3];
        let x = array![[1., 3.], [2., 0.]];

        dense.forward(&params, x.view()).unwrap();
        let dx = dense
            .backward(&params, &mut grad, array![[1.], [0.5]])
            .unwrap();

        // dw = x^T · d, db = sum(d), dx = d · w^T
        assert_eq!(grad, [2., 3., 1.5]);
        assert_eq!(dx, array![[2., -1.], [1., -0.5]]);
    }

    #[test]
    fn rejects_wrong_parameter_lengths() {
        let dense = Dense::new((2, 2));
        let x = array![[1., 1.]];

        assert!(dense.predict(&[0.; 5], x.view()).is_err());
    }
}
