//! Per-component isolation boundary.
//!
//! A boundary owns the resolved module set of exactly one component. Nothing is
//! shared between boundaries except the (read-only) [`ResolutionPolicy`], so one
//! component's dependency choices never leak into another's.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::contracts::ModuleLoader;
use crate::error::HostError;
use crate::loader::arbitration::{
    self, base_module_candidates, CandidateKind, CandidateSet, Resolution, SearchRoots,
};
use crate::loader::{platform, LoadedModule, NativeLibrary};
use crate::manifest::{DependencyCatalog, DependencyRef, ModuleImage};
use crate::policy::ResolutionPolicy;

/// Host-wide inputs for opening boundaries.
#[derive(Debug, Clone, Default)]
pub struct BoundaryOptions {
    /// Shared store root; relative paths are joined onto each component's directory.
    pub shared_library_path: Option<PathBuf>,
    pub probing_paths: Vec<PathBuf>,
    pub resource_probing_paths: Vec<PathBuf>,
    pub policy: Arc<ResolutionPolicy>,
}

pub struct IsolationBoundary {
    id: Uuid,
    component: String,
    entry_path: PathBuf,
    roots: SearchRoots,
    resource_roots: Vec<PathBuf>,
    catalog: DependencyCatalog,
    policy: Arc<ResolutionPolicy>,
    modules: DashMap<String, Arc<LoadedModule>>,
    natives: DashMap<String, NativeLibrary>,
    resources: DashMap<String, Arc<LoadedModule>>,
    load_order: RwLock<Vec<Arc<LoadedModule>>>,
}

impl std::fmt::Debug for IsolationBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationBoundary")
            .field("id", &self.id)
            .field("component", &self.component)
            .field("modules", &self.modules.len())
            .field("natives", &self.natives.len())
            .finish()
    }
}

impl IsolationBoundary {
    /// Open a boundary for the component whose entry module is `entry_path`.
    ///
    /// Reads the dependency manifest; nothing is resolved until [`Self::load_entry`].
    pub fn open(entry_path: &Path, opts: &BoundaryOptions) -> Result<Self, HostError> {
        let component = entry_path.display().to_string();
        let base_dir = entry_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let catalog =
            DependencyCatalog::load_for_entry(entry_path).map_err(|source| HostError::Manifest {
                component: component.clone(),
                path: DependencyCatalog::manifest_path_for(entry_path),
                source,
            })?;

        let shared_root = opts
            .shared_library_path
            .as_ref()
            .map(|p| base_dir.join(p));
        let probing_roots = opts
            .probing_paths
            .iter()
            .chain(catalog.probing_paths())
            .map(|p| base_dir.join(p))
            .collect();
        let resource_roots = std::iter::once(base_dir.clone())
            .chain(opts.resource_probing_paths.iter().map(|p| base_dir.join(p)))
            .collect();

        let id = Uuid::now_v7();
        tracing::debug!(
            boundary = %id,
            component = %component,
            dependencies = catalog.entries().len(),
            shared_root = ?shared_root,
            "Isolation boundary opened"
        );

        Ok(Self {
            id,
            component,
            entry_path: entry_path.to_path_buf(),
            roots: SearchRoots {
                base_dir,
                shared_root,
                probing_roots,
            },
            resource_roots,
            catalog,
            policy: opts.policy.clone(),
            modules: DashMap::new(),
            natives: DashMap::new(),
            resources: DashMap::new(),
            load_order: RwLock::new(Vec::new()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn base_dir(&self) -> &Path {
        &self.roots.base_dir
    }

    pub fn catalog(&self) -> &DependencyCatalog {
        &self.catalog
    }

    /// Modules in the order they were first loaded; the entry module comes first.
    pub fn loaded_modules(&self) -> Vec<Arc<LoadedModule>> {
        self.load_order.read().clone()
    }

    /// Load the entry module, then every managed dependency declared in the manifest.
    pub fn load_entry(&self) -> Result<Arc<LoadedModule>, HostError> {
        let image = ModuleImage::from_file(&self.entry_path).map_err(|source| HostError::Load {
            component: self.component.clone(),
            dependency: self.entry_stem(),
            path: self.entry_path.clone(),
            source,
        })?;

        let entry = Arc::new(LoadedModule {
            name: image.name.clone(),
            path: self.entry_path.clone(),
            version: image.parsed_version(),
            source: CandidateKind::Local,
            image,
        });
        let entry = self.remember(entry);
        tracing::debug!(component = %self.component, module = %entry.name, "Entry module loaded");

        for dep in self.catalog.modules() {
            if dep.name.eq_ignore_ascii_case(&entry.name) {
                continue;
            }
            self.load_module(&dep.name)?;
        }

        Ok(entry)
    }

    /// Resolve and load a managed module by logical name. Cached per boundary.
    ///
    /// Logical names are ASCII case-insensitive; a declared module is recorded
    /// under its manifest spelling.
    pub fn load_module(&self, name: &str) -> Result<Arc<LoadedModule>, HostError> {
        if let Some(hit) = self.modules.get(&name.to_ascii_lowercase()) {
            return Ok(hit.clone());
        }

        let declared = self.catalog.find_module(name);
        let (found, searched, behavior) = match declared {
            Some(dep) => {
                let behavior = self.policy.behavior_for(&dep.name);
                let candidates = CandidateSet::for_dependency(dep, &self.roots);
                (
                    arbitration::search_library(behavior, &candidates),
                    candidates.searched(),
                    Some(behavior),
                )
            }
            None => {
                let candidates = base_module_candidates(&self.roots.base_dir, name);
                let found = candidates.iter().find(|p| p.is_file()).map(|p| Resolution {
                    path: p.clone(),
                    kind: CandidateKind::Base,
                });
                (found, candidates, None)
            }
        };

        let Some(found) = found else {
            return Err(HostError::Resolution {
                component: self.component.clone(),
                dependency: name.to_string(),
                searched,
            });
        };

        tracing::trace!(
            component = %self.component,
            dependency = name,
            path = %found.path.display(),
            policy = ?behavior,
            candidate = %found.kind,
            "Dependency resolved"
        );

        let module = self.parse_module(name, declared.map(|d| d.name.as_str()), &found)?;
        Ok(self.remember(module))
    }

    /// Resolve and validate a native binary by base name. Cached per boundary.
    pub fn load_native(&self, name: &str) -> Result<NativeLibrary, HostError> {
        let key = name.to_ascii_lowercase();
        if let Some(hit) = self.natives.get(&key) {
            return Ok(hit.clone());
        }

        let mut searched = Vec::new();
        let found = self
            .search_native(name, &mut searched)
            .or_else(|| {
                platform::host_library_dirs().iter().find_map(|dir| {
                    arbitration::probe_decorated(
                        dir,
                        platform::NATIVE_PREFIXES,
                        name,
                        CandidateKind::Host,
                        &mut searched,
                    )
                })
            });

        let Some(found) = found else {
            return Err(HostError::Resolution {
                component: self.component.clone(),
                dependency: name.to_string(),
                searched,
            });
        };

        tracing::trace!(
            component = %self.component,
            dependency = name,
            path = %found.path.display(),
            candidate = %found.kind,
            "Native library resolved"
        );

        validate_native(&found.path).map_err(|source| HostError::Load {
            component: self.component.clone(),
            dependency: name.to_string(),
            path: found.path.clone(),
            source,
        })?;

        let lib = NativeLibrary {
            name: name.to_string(),
            path: found.path,
            source: found.kind,
        };
        Ok(self
            .natives
            .entry(key)
            .or_insert(lib)
            .value()
            .clone())
    }

    fn search_native(&self, name: &str, searched: &mut Vec<PathBuf>) -> Option<Resolution> {
        for prefix in platform::NATIVE_PREFIXES {
            let declared = self.catalog.find_native(&format!("{prefix}{name}")).or_else(|| {
                platform::trim_native_suffix(name)
                    .and_then(|trimmed| self.catalog.find_native(&format!("{prefix}{trimmed}")))
            });

            let found = match declared {
                Some(dep) => self.search_declared_native(dep, prefix, searched),
                None => arbitration::probe_decorated(
                    &self.roots.base_dir,
                    &[prefix],
                    name,
                    CandidateKind::Base,
                    searched,
                ),
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    fn search_declared_native(
        &self,
        dep: &DependencyRef,
        prefix: &str,
        searched: &mut Vec<PathBuf>,
    ) -> Option<Resolution> {
        let behavior = self.policy.behavior_for(&dep.name);
        arbitration::search_native_library(dep, prefix, behavior, &self.roots, searched)
    }

    /// Culture-specific resource module. Absence is not an error.
    pub fn load_resource(
        &self,
        name: &str,
        culture: &str,
    ) -> Result<Option<Arc<LoadedModule>>, HostError> {
        let culture = culture.trim();
        if culture.is_empty() || culture.eq_ignore_ascii_case("neutral") {
            return self.load_module(name).map(Some);
        }

        let key = format!("{culture}/{name}").to_ascii_lowercase();
        if let Some(hit) = self.resources.get(&key) {
            return Ok(Some(hit.clone()));
        }

        let found = self.resource_roots.iter().find_map(|root| {
            base_module_candidates(&root.join(culture), name)
                .into_iter()
                .find(|p| p.is_file())
        });

        let Some(path) = found else {
            tracing::trace!(component = %self.component, resource = name, culture, "No culture resource");
            return Ok(None);
        };

        let resolution = Resolution {
            path,
            kind: CandidateKind::Local,
        };
        let module = self.parse_module(name, None, &resolution)?;
        let module = self.resources.entry(key).or_insert(module).value().clone();
        Ok(Some(module))
    }

    /// Read the image at `found` and check it declares `name`. The module is named
    /// `canonical` when given, otherwise by the image itself.
    fn parse_module(
        &self,
        name: &str,
        canonical: Option<&str>,
        found: &Resolution,
    ) -> Result<Arc<LoadedModule>, HostError> {
        let load_err = |source| HostError::Load {
            component: self.component.clone(),
            dependency: name.to_string(),
            path: found.path.clone(),
            source,
        };

        let image = ModuleImage::from_file(&found.path).map_err(load_err)?;
        if !image.name.eq_ignore_ascii_case(name) {
            return Err(load_err(anyhow::anyhow!(
                "module image declares name '{}', expected '{name}'",
                image.name
            )));
        }

        Ok(Arc::new(LoadedModule {
            name: canonical.unwrap_or(&image.name).to_string(),
            path: found.path.clone(),
            version: image.parsed_version(),
            source: found.kind,
            image,
        }))
    }

    /// Cache a module under its lowercased name; the first writer wins and is
    /// recorded in load order.
    fn remember(&self, module: Arc<LoadedModule>) -> Arc<LoadedModule> {
        match self.modules.entry(module.name.to_ascii_lowercase()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => {
                slot.insert(module.clone());
                self.load_order.write().push(module.clone());
                module
            }
        }
    }

    fn entry_stem(&self) -> String {
        self.entry_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(crate::manifest::strip_module_extension)
            .unwrap_or_default()
            .to_string()
    }
}

impl ModuleLoader for IsolationBoundary {
    fn load_module(&self, name: &str) -> Result<Arc<LoadedModule>, HostError> {
        IsolationBoundary::load_module(self, name)
    }

    fn load_native(&self, name: &str) -> Result<NativeLibrary, HostError> {
        IsolationBoundary::load_native(self, name)
    }

    fn load_resource(
        &self,
        name: &str,
        culture: &str,
    ) -> Result<Option<Arc<LoadedModule>>, HostError> {
        IsolationBoundary::load_resource(self, name, culture)
    }
}

fn validate_native(path: &Path) -> anyhow::Result<()> {
    let mut header = Vec::with_capacity(4);
    File::open(path)?.take(4).read_to_end(&mut header)?;
    if !platform::is_native_image(&header) {
        anyhow::bail!("not a recognized native binary image");
    }
    Ok(())
}
