//! Configuration, filesystem paths, and logging shared by the pgAnalytics client crates.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_API_URL, DEFAULT_LOG_LEVEL, DEFAULT_REQUEST_TIMEOUT_SECS, ENV_API_URL,
    ENV_LOG_LEVEL, ENV_REQUEST_TIMEOUT_SECS,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, LogFileWriter, LogConfig};
pub use paths::Paths;
