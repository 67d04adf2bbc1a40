pub mod api;
pub mod config;
pub mod db;
pub mod driver;
pub mod engine;
pub mod error;
pub mod http_driver;
pub mod policy;
pub mod registry;

pub use engine::{ClearOutcome, Engine, Transition};
pub use error::{ConfigError, DeviceError, EngineError, EngineResult};
