use super::Optimizer;
use crate::{DemandErr, Result};

/// The Adam optimizer, with bias-corrected first and second moment estimates.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    m: Box<[f32]>,
    s: Box<[f32]>,
    epsilon: f32,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            m: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
            epsilon,
        }
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        for (what, got) in [("gradient", grad.len()), ("parameters", params.len())] {
            if got != self.m.len() {
                return Err(DemandErr::SizeMismatch {
                    what,
                    got,
                    expected: self.m.len(),
                });
            }
        }

        self.beta1_t *= self.beta1;
        self.beta2_t *= self.beta2;

        let (lr, b1, b2, eps) = (self.learning_rate, self.beta1, self.beta2, self.epsilon);
        let m_correction = 1. - self.beta1_t;
        let s_correction = 1. - self.beta2_t;

        let moments = self.m.iter_mut().zip(self.s.iter_mut());

        for ((p, &g), (m, s)) in params.iter_mut().zip(grad).zip(moments) {
            *m = b1 * *m + (1. - b1) * g;
            *s = b2 * *s + (1. - b2) * g * g;

            let m_hat = *m / m_correction;
            let s_hat = *s / s_correction;
            *p -= lr * m_hat / (s_hat.sqrt() + eps);
        }

        Ok(())
    }
}
