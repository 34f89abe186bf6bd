mod loss_fn;
mod rmse;

pub use loss_fn::LossFn;
pub use rmse::Rmse;
