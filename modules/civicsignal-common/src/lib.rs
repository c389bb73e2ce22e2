pub mod config;
pub mod error;
pub mod quality;
pub mod trust;
pub mod types;

pub use config::{load_config, EngineConfig};
pub use error::{CivicSignalError, RejectReason};
pub use quality::*;
pub use trust::*;
pub use types::*;
