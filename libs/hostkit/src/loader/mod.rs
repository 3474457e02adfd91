//! Isolated loading: per-component boundaries and dependency arbitration.

pub mod arbitration;
mod boundary;
pub mod platform;

use std::path::PathBuf;

pub use arbitration::CandidateKind;
pub use boundary::{BoundaryOptions, IsolationBoundary};

use crate::manifest::{ModuleImage, ModuleVersion};

/// A module resolved and parsed inside one isolation boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    /// Logical name the module was requested under.
    pub name: String,
    pub path: PathBuf,
    pub version: ModuleVersion,
    pub source: CandidateKind,
    pub image: ModuleImage,
}

impl LoadedModule {
    pub fn factory_ids(&self) -> impl Iterator<Item = &str> {
        self.image.factory_ids()
    }
}

/// A validated native binary.
///
/// The host checks the file is a recognizable executable image but never maps it;
/// doing so is up to the component that asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeLibrary {
    pub name: String,
    pub path: PathBuf,
    pub source: CandidateKind,
}
