mod conv;
mod dense;
mod layer;
mod relu;

pub use conv::{Conv2d, ConvGeometry, conv_output_size};
pub use dense::Dense;
pub use layer::Layer;
pub use relu::Relu;
