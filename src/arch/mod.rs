mod demand_net;
pub mod init;
pub mod layers;
pub mod loss;
mod model;
mod sequential;

pub use demand_net::{DemandNet, HIDDEN_UNITS, NetTopology};
pub use model::Model;
pub use sequential::Sequential;
