pub mod config;
pub mod error;
pub mod instance;
pub mod raw_station;

pub use config::SimConfig;
pub use error::{Rejected, SimError};
pub use instance::{InstanceConfig, Simulation, TickReport, TrainRequest};
