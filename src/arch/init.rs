use rand::Rng;
use rand_distr::{Distribution, Uniform};

use super::layers::Layer;
use crate::Result;

/// Draws the parameters of every layer from `U(-1 / sqrt(fan_in), 1 / sqrt(fan_in))`, biases
/// included.
///
/// # Arguments
/// * `layers` - The layers, in the order their parameters are laid out.
/// * `rng` - A random number generator.
///
/// # Returns
/// The flat parameter buffer, or an error if a layer yields an invalid range.
pub fn fan_in_uniform<R: Rng>(layers: &[Layer], rng: &mut R) -> Result<Vec<f32>> {
    let size = layers.iter().map(Layer::size).sum();
    let mut params = Vec::with_capacity(size);

    for layer in layers {
        let Some(fan_in) = layer.fan_in() else {
            continue;
        };

        let range = 1. / (fan_in.max(1) as f32).sqrt();
        let distribution = Uniform::new(-range, range)?;
        params.extend(distribution.sample_iter(&mut *rng).take(layer.size()));
    }

    Ok(params)
}
