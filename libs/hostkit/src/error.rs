//! Structured errors for component loading and lifecycle control.

use std::path::PathBuf;

use thiserror::Error;

use crate::lifecycle::{ComponentState, LifecycleOp};

/// Errors produced while resolving, loading, constructing or driving a component.
///
/// Load-time variants (`Resolution`, `Load`, `Manifest`, `Factory`) are fatal to the
/// component being loaded. `Lifecycle` is fatal only during the initial start.
#[derive(Debug, Error)]
pub enum HostError {
    #[error(
        "component '{component}': dependency '{dependency}' not found (searched: {})",
        display_paths(searched)
    )]
    Resolution {
        component: String,
        dependency: String,
        searched: Vec<PathBuf>,
    },

    #[error("component '{component}': failed to load '{dependency}' from '{}'", path.display())]
    Load {
        component: String,
        dependency: String,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("component '{component}': invalid dependency manifest '{}'", path.display())]
    Manifest {
        component: String,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("component '{component}': factory '{factory}' failed")]
    Factory {
        component: String,
        factory: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("component '{component}': {op} failed")]
    Lifecycle {
        component: String,
        op: LifecycleOp,
        #[source]
        source: anyhow::Error,
    },

    #[error("component '{component}': cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        component: String,
        from: ComponentState,
        to: ComponentState,
    },
}

impl HostError {
    /// Identity (source path) of the component the error belongs to.
    pub fn component(&self) -> &str {
        match self {
            HostError::Resolution { component, .. }
            | HostError::Load { component, .. }
            | HostError::Manifest { component, .. }
            | HostError::Factory { component, .. }
            | HostError::Lifecycle { component, .. }
            | HostError::InvalidTransition { component, .. } => component,
        }
    }

    /// Name of the dependency that could not be resolved or loaded, if any.
    pub fn dependency(&self) -> Option<&str> {
        match self {
            HostError::Resolution { dependency, .. } | HostError::Load { dependency, .. } => {
                Some(dependency)
            }
            _ => None,
        }
    }

    /// The error followed by every source, joined with `": "`, for single-line logs.
    pub fn display_chain(&self) -> String {
        let mut out = self.to_string();
        let mut next = std::error::Error::source(self);
        while let Some(cause) = next {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            next = cause.source();
        }
        out
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "<none>".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
