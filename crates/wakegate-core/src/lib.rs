pub mod config;
pub mod types;

pub use config::{ConfigError, ConfigResult, WakegateConfig, parse_duration};
pub use types::*;
