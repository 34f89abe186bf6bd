use log::info;
use ndarray::Zip;

use crate::{
    DemandErr, Result,
    arch::Model,
    data::{DataLoader, TimeBucket},
    geo::DemandGrid,
};

/// The network's output for a single sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// The sample's index in the dataset.
    pub index: usize,
    /// The bucket being predicted.
    pub bucket: TimeBucket,
    /// The raw regression output, it may hold negative or fractional values.
    pub grid: DemandGrid,
}

impl Prediction {
    /// Clamps every cell at zero and rounds it to the nearest integer count.
    pub fn rounded_counts(&self) -> DemandGrid {
        self.grid.map(|v| v.max(0.).round())
    }
}

/// The result of running a model over a whole loader.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// One prediction per sample, in dataset order.
    pub predictions: Vec<Prediction>,
    /// The root mean squared error over every cell of every sample, `None` without samples.
    pub rmse: Option<f32>,
}

/// Runs the model in inference mode over every sample of the loader, in dataset order.
///
/// No gradient is computed and the parameters are left untouched.
///
/// # Arguments
/// * `model` - The trained model.
/// * `loader` - The evaluation samples.
///
/// # Returns
/// The predictions reshaped to the dataset's grid shape and the aggregate RMSE, or an error
/// if the model's output doesn't match the labels.
pub fn evaluate<M: Model>(model: &M, loader: &DataLoader) -> Result<Evaluation> {
    let dataset = loader.dataset();
    let shape = dataset.shape();

    let mut predictions = Vec::with_capacity(dataset.len());
    let mut squared_error = 0f64;
    let mut cells = 0;

    for batch in loader.in_order() {
        let y_pred = model.predict(batch.x.view())?;

        if y_pred.dim() != batch.y.dim() {
            return Err(DemandErr::SizeMismatch {
                what: "predictions",
                got: y_pred.len(),
                expected: batch.y.len(),
            });
        }

        Zip::from(&y_pred).and(&batch.y).for_each(|&p, &y| {
            squared_error += f64::from(p - y).powi(2);
        });
        cells += y_pred.len();

        for (row, &index) in y_pred.outer_iter().zip(&batch.indices) {
            let bucket = dataset
                .get(index)
                .ok_or(DemandErr::SizeMismatch {
                    what: "dataset index",
                    got: index,
                    expected: dataset.len(),
                })?
                .label_bucket();

            predictions.push(Prediction {
                index,
                bucket,
                grid: DemandGrid::from_flat(shape, row.to_vec())?,
            });
        }
    }

    let rmse = (cells > 0).then(|| (squared_error / cells as f64).sqrt() as f32);

    if let Some(rmse) = rmse {
        info!(samples = predictions.len(), rmse = rmse; "evaluation finished");
    }

    Ok(Evaluation { predictions, rmse })
}
