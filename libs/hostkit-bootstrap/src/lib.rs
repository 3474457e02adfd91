//! Process bootstrap for the component host: layered configuration,
//! logging setup and home directory resolution.

pub mod config;
pub mod logging;
pub mod paths;

pub use config::*;
pub use logging::*;
