mod component;
mod orchestrator;
mod runner;
mod shutdown;

pub use component::HostedComponent;
pub use orchestrator::{ComponentOrchestrator, HostSettings, DEFAULT_STOPPING_TIMEOUT};
pub use runner::{run, RunOptions, ShutdownOptions};
pub use shutdown::wait_for_shutdown;
