use ndarray::{Array2, ArrayView2};

use super::{Model, layers::Layer, loss::LossFn};
use crate::{DemandErr, Result, optimization::Optimizer};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
///
/// It owns a single flat parameter buffer and a gradient buffer of the same length, every
/// layer sees the slice matching its position.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
    params: Vec<f32>,
    grad: Vec<f32>,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    /// * `params` - The flat parameters of every layer, one after the other.
    ///
    /// # Returns
    /// An error if the amount of parameters doesn't match the layers.
    pub fn new<I>(layers: I, params: Vec<f32>) -> Result<Self>
    where
        I: IntoIterator<Item = Layer>,
    {
        let layers: Vec<_> = layers.into_iter().collect();
        let size = layers.iter().map(Layer::size).sum();

        if params.len() != size {
            return Err(DemandErr::SizeMismatch {
                what: "parameters",
                got: params.len(),
                expected: size,
            });
        }

        Ok(Self {
            layers,
            grad: vec![0.; size],
            params,
        })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Returns the gradient computed on the last backprop.
    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    /// Makes a forward pass through the network, keeping the metadata every layer needs for
    /// the backward pass.
    ///
    /// # Arguments
    /// * `x` - The input data.
    ///
    /// # Returns
    /// The prediction for the given input or an error if occurred.
    pub fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut start = 0;
        let mut x = x.to_owned();

        for layer in &mut self.layers {
            let end = start + layer.size();
            x = layer.forward(&self.params[start..end], x.view())?;
            start = end;
        }

        Ok(x)
    }
}

impl Model for Sequential {
    fn size(&self) -> usize {
        self.params.len()
    }

    fn params(&self) -> &[f32] {
        &self.params
    }

    fn predict(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let mut start = 0;
        let mut x = x.to_owned();

        for layer in &self.layers {
            let end = start + layer.size();
            x = layer.predict(&self.params[start..end], x.view())?;
            start = end;
        }

        Ok(x)
    }

    fn backprop<O, L>(
        &mut self,
        optimizer: &mut O,
        loss_fn: &L,
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
    ) -> Result<f32>
    where
        O: Optimizer,
        L: LossFn,
    {
        self.grad.fill(0.);

        let y_pred = self.forward(x)?;

        if y_pred.dim() != y.dim() {
            return Err(DemandErr::SizeMismatch {
                what: "labels",
                got: y.len(),
                expected: y_pred.len(),
            });
        }

        let loss = loss_fn.loss(y_pred.view(), y);

        if !loss.is_finite() {
            return Err(DemandErr::NonFiniteLoss { loss });
        }

        let mut d = loss_fn.loss_prime(y_pred.view(), y);

        let Self {
            layers,
            params,
            grad,
        } = self;

        let mut end = params.len();

        for layer in layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&params[start..end], &mut grad[start..end], d)?;
            end = start;
        }

        optimizer.update_params(grad, params)?;
        Ok(loss)
    }
}
