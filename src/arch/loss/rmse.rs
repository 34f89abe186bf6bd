use ndarray::{Array2, ArrayView2};

use super::LossFn;

/// Root mean squared error loss function, averaged over every cell of every sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct Rmse;

impl Rmse {
    /// Returns a new `Rmse`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Rmse {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        (&y_pred - &y)
            .mapv(|x| x.powi(2))
            .mean()
            .unwrap_or_default()
            .sqrt()
    }

    // d/dp sqrt(mean((p - y)^2)) = (p - y) / (n * rmse), taken as zero at a perfect fit.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let diff = &y_pred - &y;
        let rmse = self.loss(y_pred, y);

        if rmse == 0.0 {
            return Array2::zeros(diff.raw_dim());
        }

        diff / (rmse * y_pred.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn perfect_predictions_have_zero_loss_and_gradient() {
        let y = array![[1., 2.], [0., 4.]];

        assert_eq!(Rmse.loss(y.view(), y.view()), 0.0);
        assert_eq!(Rmse.loss_prime(y.view(), y.view()), Array2::<f32>::zeros((2, 2)));
    }

    #[test]
    fn loss_is_the_root_of_the_mean_square() {
        let y_pred = array![[3., 0.], [0., 0.]];
        let y = array![[0., 0.], [0., 4.]];

        // sqrt((9 + 16) / 4)
        assert_eq!(Rmse.loss(y_pred.view(), y.view()), 2.5);
        assert_eq!(Rmse.loss(y.view(), y_pred.view()), 2.5);

        let d = Rmse.loss_prime(y_pred.view(), y.view());
        assert_eq!(d, array![[0.3, 0.], [0., -0.4]]);
    }

    #[test]
    fn empty_batches_have_zero_loss() {
        let empty = Array2::<f32>::zeros((0, 4));
        assert_eq!(Rmse.loss(empty.view(), empty.view()), 0.0);
    }
}
