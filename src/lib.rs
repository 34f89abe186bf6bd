pub mod arch;
pub mod config;
pub mod data;
mod error;
pub mod geo;
pub mod optimization;
pub mod training;

pub use error::{DemandErr, Result};
