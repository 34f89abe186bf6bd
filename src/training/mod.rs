mod evaluator;
mod stop;
mod trainer;

pub use evaluator::{Evaluation, Prediction, evaluate};
pub use stop::StopSignal;
pub use trainer::{TrainReport, Trainer, fit};
