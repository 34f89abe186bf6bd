use ndarray::{Array2, ArrayView2};

use crate::{Result, arch::loss::LossFn, optimization::Optimizer};

pub trait Model {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// Returns the model's flat parameter buffer.
    fn params(&self) -> &[f32];

    /// Computes the model's output without keeping any forward metadata, leaving the model
    /// untouched.
    ///
    /// # Arguments
    /// * `x` - The inputs, one sample per row.
    ///
    /// # Returns
    /// The outputs, one sample per row.
    fn predict(&self, x: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Computes the gradient of the loss function with respect to the parameters of the model
    /// over a single batch and **updates the parameters** according to the optimizer.
    ///
    /// # Arguments
    /// * `optimizer` - The optimizer that dictates how to update the weights.
    /// * `loss_fn` - The loss function.
    /// * `x` - The batch inputs.
    /// * `y` - The batch labels, with the same shape as the model's output.
    ///
    /// # Returns
    /// The batch loss, computed before the update. A non finite loss is an error and leaves
    /// the parameters untouched.
    fn backprop<O, L>(
        &mut self,
        optimizer: &mut O,
        loss_fn: &L,
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
    ) -> Result<f32>
    where
        O: Optimizer,
        L: LossFn;
}
