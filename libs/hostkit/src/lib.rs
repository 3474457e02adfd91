//! # HostKit - Isolated Component Host
//!
//! Loads independently built components into per-component isolation boundaries,
//! arbitrates which copy of a shared dependency each component binds to, and
//! drives the components through their lifecycle.
//!
//! ## Features
//!
//! - **Isolated**: every component resolves its dependencies in its own boundary
//! - **Arbitrated**: shared vs local copies chosen by `prefer_shared`, `prefer_local`
//!   or `highest_version`, with per-dependency overrides
//! - **Auto-discovery**: factories register via inventory and are matched to modules
//!   by the `component_factory:<id>` capabilities they export
//! - **Ordered lifecycle**: start/resume forward, pause/stop/unload in reverse
//!
//! ## Writing a component factory
//!
//! ```rust,ignore
//! use hostkit::{ComponentFactory, FactoryContext, HostableComponent};
//! use std::sync::Arc;
//!
//! struct ClockFactory;
//!
//! impl ComponentFactory for ClockFactory {
//!     fn create_units(&self, ctx: &FactoryContext) -> anyhow::Result<Vec<Arc<dyn HostableComponent>>> {
//!         let cfg: ClockConfig = ctx.config().section("clock").bind()?;
//!         Ok(vec![Arc::new(Clock::new(cfg))])
//!     }
//! }
//!
//! hostkit::inventory::submit! {
//!     hostkit::FactoryRegistration::new("clock", || Box::new(ClockFactory))
//! }
//! ```

pub use anyhow::Result;
pub use async_trait::async_trait;

// Re-export inventory for factory crates
pub use inventory;

pub mod config;
pub mod contracts;
pub mod discovery;
pub mod error;
pub mod lifecycle;
pub mod loader;
pub mod manifest;
pub mod policy;
pub mod registry;
pub mod runtime;

pub use config::{ComponentConfig, ConfigSource};
pub use contracts::{ComponentFactory, HostableComponent, ModuleLoader};
pub use discovery::FactoryContext;
pub use error::HostError;
pub use lifecycle::{ComponentState, LifecycleOp, StartGate};
pub use loader::{BoundaryOptions, CandidateKind, IsolationBoundary, LoadedModule, NativeLibrary};
pub use manifest::{DependencyCatalog, DependencyRef, ModuleImage, ModuleVersion};
pub use policy::{ResolutionPolicy, SharedLibLoadBehavior};
pub use registry::{FactoryRegistration, FactoryRegistry, RegistryError};
pub use runtime::{run, ComponentOrchestrator, HostSettings, HostedComponent, RunOptions, ShutdownOptions};
