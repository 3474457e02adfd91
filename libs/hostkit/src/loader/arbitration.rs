//! Candidate search and shared/local arbitration.
//!
//! The order implemented here is a compatibility contract: components are
//! deployed assuming it, so it must not change between releases.
//!
//! Managed dependency:
//! 1. effective behavior = override by name, else default
//! 2. shared copy present?
//!    - no  → local copy if present
//!    - yes → `PreferLocal` + local present → local;
//!            `HighestVersion` + local present + local strictly newer → local;
//!            otherwise shared
//! 3. additional probing paths
//! 4. `<base>/<name><ext>` for every module extension

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::loader::platform;
use crate::manifest::{compare_module_files, DependencyRef};
use crate::policy::SharedLibLoadBehavior;

/// Where a resolved file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateKind {
    Shared,
    Local,
    Probing,
    Base,
    Host,
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CandidateKind::Shared => "shared",
            CandidateKind::Local => "local",
            CandidateKind::Probing => "probing",
            CandidateKind::Base => "base",
            CandidateKind::Host => "host",
        };
        f.write_str(s)
    }
}

/// Outcome of a successful search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub path: PathBuf,
    pub kind: CandidateKind,
}

/// Roots a boundary searches, fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct SearchRoots {
    pub base_dir: PathBuf,
    pub shared_root: Option<PathBuf>,
    pub probing_roots: Vec<PathBuf>,
}

/// Physical locations where one dependency might exist, computed per call.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    pub shared: Option<PathBuf>,
    pub local: PathBuf,
    pub probing: Vec<PathBuf>,
    pub base_fallback: Vec<PathBuf>,
}

impl CandidateSet {
    pub fn for_dependency(dep: &DependencyRef, roots: &SearchRoots) -> Self {
        Self {
            shared: roots
                .shared_root
                .as_ref()
                .map(|shared| shared.join(&dep.app_local_path)),
            local: roots.base_dir.join(&dep.app_local_path),
            probing: roots
                .probing_roots
                .iter()
                .map(|root| root.join(&dep.probing_path))
                .collect(),
            base_fallback: base_module_candidates(&roots.base_dir, &dep.name),
        }
    }

    /// Every path in search order, used for error reporting.
    pub fn searched(&self) -> Vec<PathBuf> {
        self.shared
            .iter()
            .chain(std::iter::once(&self.local))
            .chain(self.probing.iter())
            .chain(self.base_fallback.iter())
            .cloned()
            .collect()
    }
}

/// `<base>/<name><ext>` for every module extension.
pub fn base_module_candidates(base_dir: &Path, name: &str) -> Vec<PathBuf> {
    platform::MODULE_EXTENSIONS
        .iter()
        .map(|ext| base_dir.join(format!("{name}{ext}")))
        .collect()
}

/// Shared-vs-local decision table.
///
/// `local_vs_shared` is only evaluated for `HighestVersion` when both copies exist;
/// it returns the ordering of the local copy relative to the shared one.
pub fn arbitrate(
    behavior: SharedLibLoadBehavior,
    shared_exists: bool,
    local_exists: bool,
    local_vs_shared: impl FnOnce() -> Ordering,
) -> Option<CandidateKind> {
    if !shared_exists {
        return local_exists.then_some(CandidateKind::Local);
    }

    match behavior {
        SharedLibLoadBehavior::PreferLocal if local_exists => Some(CandidateKind::Local),
        SharedLibLoadBehavior::HighestVersion
            if local_exists && local_vs_shared() == Ordering::Greater =>
        {
            Some(CandidateKind::Local)
        }
        _ => Some(CandidateKind::Shared),
    }
}

/// Apply the decision table to a candidate set against the filesystem.
pub fn arbitrate_candidates(
    behavior: SharedLibLoadBehavior,
    candidates: &CandidateSet,
) -> Option<Resolution> {
    let shared = candidates.shared.as_ref().filter(|p| p.is_file());
    let local_exists = candidates.local.is_file();

    let kind = arbitrate(behavior, shared.is_some(), local_exists, || {
        match shared {
            Some(shared) => compare_module_files(&candidates.local, shared),
            None => Ordering::Equal,
        }
    })?;

    let path = match (kind, shared) {
        (CandidateKind::Shared, Some(shared)) => shared.clone(),
        _ => candidates.local.clone(),
    };
    Some(Resolution { path, kind })
}

/// Full managed search: arbitration, probing paths, then base-directory fallback.
pub fn search_library(
    behavior: SharedLibLoadBehavior,
    candidates: &CandidateSet,
) -> Option<Resolution> {
    if let Some(found) = arbitrate_candidates(behavior, candidates) {
        return Some(found);
    }

    if let Some(path) = candidates.probing.iter().find(|p| p.is_file()) {
        return Some(Resolution {
            path: path.clone(),
            kind: CandidateKind::Probing,
        });
    }

    candidates
        .base_fallback
        .iter()
        .find(|p| p.is_file())
        .map(|path| Resolution {
            path: path.clone(),
            kind: CandidateKind::Base,
        })
}

/// Search for a native library declared in the catalog under `prefix + name`.
///
/// Arbitration over the declared path first, then decorated names in the base
/// directory, then probing paths. Every probed path is appended to `searched`.
pub fn search_native_library(
    dep: &DependencyRef,
    prefix: &str,
    behavior: SharedLibLoadBehavior,
    roots: &SearchRoots,
    searched: &mut Vec<PathBuf>,
) -> Option<Resolution> {
    let candidates = CandidateSet::for_dependency(dep, roots);
    searched.extend(candidates.shared.iter().cloned());
    searched.push(candidates.local.clone());
    if let Some(found) = arbitrate_candidates(behavior, &candidates) {
        return Some(found);
    }

    // The catalog name already carries the prefix; only add suffixes here.
    for suffix in platform::NATIVE_SUFFIXES {
        let candidate = roots.base_dir.join(format!("{}{suffix}", dep.name));
        searched.push(candidate.clone());
        if candidate.is_file() {
            return Some(Resolution {
                path: candidate,
                kind: CandidateKind::Base,
            });
        }
    }
    tracing::trace!(dependency = %dep.name, prefix, "Native library not found under declared name");

    searched.extend(candidates.probing.iter().cloned());
    candidates
        .probing
        .iter()
        .find(|p| p.is_file())
        .map(|path| Resolution {
            path: path.clone(),
            kind: CandidateKind::Probing,
        })
}

/// Probe `dir/{prefix}{name}{suffix}` and `dir/{prefix}{name}` for each given prefix.
pub fn probe_decorated(
    dir: &Path,
    prefixes: &[&str],
    name: &str,
    kind: CandidateKind,
    searched: &mut Vec<PathBuf>,
) -> Option<Resolution> {
    for prefix in prefixes {
        for file_name in platform::native_file_names(prefix, name) {
            let candidate = dir.join(file_name);
            searched.push(candidate.clone());
            if candidate.is_file() {
                return Some(Resolution {
                    path: candidate,
                    kind,
                });
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_module(path: &Path, name: &str, version: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(
            path,
            format!(r#"{{"name":"{name}","version":"{version}"}}"#),
        )
        .unwrap();
    }

    fn roots(base: &Path, shared: &Path) -> SearchRoots {
        SearchRoots {
            base_dir: base.to_path_buf(),
            shared_root: Some(shared.to_path_buf()),
            probing_roots: vec![],
        }
    }

    #[test]
    fn decision_table() {
        use CandidateKind::*;
        use SharedLibLoadBehavior::*;
        let never = || panic!("version comparison not expected");

        assert_eq!(arbitrate(PreferShared, false, false, never), None);
        assert_eq!(arbitrate(PreferShared, false, true, never), Some(Local));
        assert_eq!(arbitrate(HighestVersion, false, true, never), Some(Local));
        assert_eq!(arbitrate(PreferShared, true, true, never), Some(Shared));
        assert_eq!(arbitrate(PreferLocal, true, true, never), Some(Local));
        assert_eq!(arbitrate(PreferLocal, true, false, never), Some(Shared));
        assert_eq!(arbitrate(HighestVersion, true, false, never), Some(Shared));
        assert_eq!(
            arbitrate(HighestVersion, true, true, || Ordering::Greater),
            Some(Local)
        );
        assert_eq!(
            arbitrate(HighestVersion, true, true, || Ordering::Equal),
            Some(Shared)
        );
        assert_eq!(
            arbitrate(HighestVersion, true, true, || Ordering::Less),
            Some(Shared)
        );
    }

    #[test]
    fn highest_version_picks_newer_shared_copy() {
        let base = tempdir().unwrap();
        let shared = tempdir().unwrap();
        write_module(&shared.path().join("Foo.module"), "Foo", "2.0.0.0");
        write_module(&base.path().join("Foo.module"), "Foo", "1.2.0.0");

        let dep = DependencyRef::module("Foo", None);
        let set = CandidateSet::for_dependency(&dep, &roots(base.path(), shared.path()));

        let found = search_library(SharedLibLoadBehavior::HighestVersion, &set).unwrap();
        assert_eq!(found.kind, CandidateKind::Shared);
        assert_eq!(found.path, shared.path().join("Foo.module"));

        let found = search_library(SharedLibLoadBehavior::PreferLocal, &set).unwrap();
        assert_eq!(found.kind, CandidateKind::Local);
        assert_eq!(found.path, base.path().join("Foo.module"));
    }

    #[test]
    fn falls_through_to_probing_then_base() {
        let base = tempdir().unwrap();
        let probe = tempdir().unwrap();
        let mut dep = DependencyRef::module("Foo", Some("1.0"));
        dep.app_local_path = PathBuf::from("lib/Foo.module");

        let r = SearchRoots {
            base_dir: base.path().to_path_buf(),
            shared_root: None,
            probing_roots: vec![probe.path().to_path_buf()],
        };

        write_module(&base.path().join("Foo.module.json"), "Foo", "1.0");
        let set = CandidateSet::for_dependency(&dep, &r);
        let found = search_library(SharedLibLoadBehavior::PreferShared, &set).unwrap();
        assert_eq!(found.kind, CandidateKind::Base);
        assert_eq!(found.path, base.path().join("Foo.module.json"));

        write_module(&probe.path().join(&dep.probing_path), "Foo", "1.0");
        let found = search_library(SharedLibLoadBehavior::PreferShared, &set).unwrap();
        assert_eq!(found.kind, CandidateKind::Probing);
    }

    #[test]
    fn searched_lists_every_candidate_in_order() {
        let dep = DependencyRef::module("Foo", None);
        let r = SearchRoots {
            base_dir: PathBuf::from("/c"),
            shared_root: Some(PathBuf::from("/s")),
            probing_roots: vec![PathBuf::from("/p")],
        };
        let searched = CandidateSet::for_dependency(&dep, &r).searched();
        assert_eq!(searched[0], PathBuf::from("/s/Foo.module"));
        assert_eq!(searched[1], PathBuf::from("/c/Foo.module"));
        assert_eq!(searched[2], PathBuf::from("/p/foo/0.0.0.0/Foo.module"));
        assert_eq!(searched.len(), 3 + platform::MODULE_EXTENSIONS.len());
    }
}
