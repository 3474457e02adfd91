//! Module images, versions and per-component dependency manifests.
//!
//! A component directory looks like:
//!
//! ```text
//! orders/
//!   Orders.module          entry module image
//!   Orders.deps.json       dependency manifest (optional)
//!   lib/Foo.module         component-local copy of a dependency
//! ```
//!
//! The shared store mirrors the same relative paths (`<shared>/lib/Foo.module`).

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Capability prefix advertised by modules that export a component factory.
pub const FACTORY_CAPABILITY_PREFIX: &str = "component_factory:";

/// Suffix of the dependency manifest placed next to an entry module.
pub const DEPS_MANIFEST_SUFFIX: &str = ".deps.json";

/// Four-part numeric version (`major.minor[.build[.revision]]`).
///
/// Missing trailing parts are zero, so `1.2` == `1.2.0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ModuleVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
    pub revision: u32,
}

impl ModuleVersion {
    /// The lowest version; unparsable versions compare as this value.
    pub const ZERO: ModuleVersion = ModuleVersion::new(0, 0, 0, 0);

    pub const fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Parse a version string, falling back to [`ModuleVersion::ZERO`].
    pub fn parse_or_zero(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.parse().ok()).unwrap_or(Self::ZERO)
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid module version '{0}'")]
pub struct VersionParseError(pub String);

impl FromStr for ModuleVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parts: Vec<&str> = trimmed.split('.').collect();
        if !(2..=4).contains(&parts.len()) {
            return Err(VersionParseError(s.to_string()));
        }

        let mut nums = [0u32; 4];
        for (slot, part) in nums.iter_mut().zip(parts.iter()) {
            // u32::from_str accepts a leading '+', reject it explicitly
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionParseError(s.to_string()));
            }
            *slot = part
                .parse()
                .map_err(|_| VersionParseError(s.to_string()))?;
        }

        Ok(ModuleVersion::new(nums[0], nums[1], nums[2], nums[3]))
    }
}

/// Parsed contents of a `*.module` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleImage {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Capability identifiers this module provides.
    #[serde(default)]
    pub exports: Vec<String>,
}

impl ModuleImage {
    /// Read and validate a module image.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("failed to read module image {}", path.display()))?;
        let image: ModuleImage = serde_json::from_slice(&raw)
            .with_context(|| format!("malformed module image {}", path.display()))?;
        if image.name.trim().is_empty() {
            bail!("module image {} has an empty name", path.display());
        }
        Ok(image)
    }

    /// Version metadata of a module file; anything unreadable is `0.0.0.0`.
    pub fn probe_version(path: &Path) -> ModuleVersion {
        #[derive(Deserialize)]
        struct VersionOnly {
            #[serde(default)]
            version: Option<String>,
        }

        std::fs::read(path)
            .ok()
            .and_then(|raw| serde_json::from_slice::<VersionOnly>(&raw).ok())
            .map(|v| ModuleVersion::parse_or_zero(v.version.as_deref()))
            .unwrap_or(ModuleVersion::ZERO)
    }

    pub fn parsed_version(&self) -> ModuleVersion {
        ModuleVersion::parse_or_zero(self.version.as_deref())
    }

    /// Factory ids advertised via `component_factory:<id>` exports.
    pub fn factory_ids(&self) -> impl Iterator<Item = &str> {
        self.exports
            .iter()
            .filter_map(|cap| cap.strip_prefix(FACTORY_CAPABILITY_PREFIX))
            .filter(|id| !id.is_empty())
    }
}

/// Whether a dependency is a loadable module or a platform native binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    Module,
    Native,
}

/// One dependency declared by a component's manifest. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRef {
    pub name: String,
    pub version: Option<String>,
    pub kind: DependencyKind,
    /// Component-relative path; also the relative path inside the shared store.
    pub app_local_path: PathBuf,
    /// Relative path joined onto each additional probing path.
    pub probing_path: PathBuf,
}

impl DependencyRef {
    pub fn module(name: impl Into<String>, version: Option<&str>) -> Self {
        let name = name.into();
        let app_local_path = PathBuf::from(format!("{name}.module"));
        Self::with_path(name, version, DependencyKind::Module, app_local_path)
    }

    pub fn native(name: impl Into<String>, app_local_path: impl Into<PathBuf>) -> Self {
        Self::with_path(name.into(), None, DependencyKind::Native, app_local_path.into())
    }

    fn with_path(
        name: String,
        version: Option<&str>,
        kind: DependencyKind,
        app_local_path: PathBuf,
    ) -> Self {
        let probing_path = Path::new(&name.to_ascii_lowercase())
            .join(version.unwrap_or("0.0.0.0"))
            .join(&app_local_path);
        Self {
            name,
            version: version.map(str::to_string),
            kind,
            app_local_path,
            probing_path,
        }
    }

    pub fn is_native(&self) -> bool {
        self.kind == DependencyKind::Native
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    libraries: Vec<RawLibrary>,
    #[serde(default)]
    probing_paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLibrary {
    name: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    native: bool,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    probing_path: Option<PathBuf>,
}

/// Everything a component declares it needs, in manifest order.
#[derive(Debug, Clone, Default)]
pub struct DependencyCatalog {
    entries: Vec<DependencyRef>,
    probing_paths: Vec<PathBuf>,
}

impl DependencyCatalog {
    /// Manifest path for an entry module (`dir/Orders.module` → `dir/Orders.deps.json`).
    pub fn manifest_path_for(entry: &Path) -> PathBuf {
        let stem = entry
            .file_name()
            .and_then(|n| n.to_str())
            .map(strip_module_extension)
            .unwrap_or_default();
        entry.with_file_name(format!("{stem}{DEPS_MANIFEST_SUFFIX}"))
    }

    /// Load the manifest next to `entry`. A missing manifest yields an empty catalog.
    pub fn load_for_entry(entry: &Path) -> Result<Self> {
        let path = Self::manifest_path_for(entry);
        if !path.is_file() {
            tracing::debug!(manifest = %path.display(), "No dependency manifest, using empty catalog");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let manifest: RawManifest =
            serde_json::from_str(raw).context("failed to parse dependency manifest")?;

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(manifest.libraries.len());
        for lib in manifest.libraries {
            if lib.name.trim().is_empty() {
                bail!("dependency manifest contains a library with an empty name");
            }
            if !seen.insert(lib.name.to_ascii_lowercase()) {
                tracing::warn!(dependency = %lib.name, "Duplicate library in manifest ignored");
                continue;
            }
            let kind = if lib.native {
                DependencyKind::Native
            } else {
                DependencyKind::Module
            };
            let app_local_path = lib.path.unwrap_or_else(|| match kind {
                DependencyKind::Module => PathBuf::from(format!("{}.module", lib.name)),
                DependencyKind::Native => PathBuf::from(&lib.name),
            });
            let mut dep =
                DependencyRef::with_path(lib.name, lib.version.as_deref(), kind, app_local_path);
            if let Some(probing) = lib.probing_path {
                dep.probing_path = probing;
            }
            entries.push(dep);
        }

        Ok(Self {
            entries,
            probing_paths: manifest.probing_paths,
        })
    }

    pub fn entries(&self) -> &[DependencyRef] {
        &self.entries
    }

    /// Managed (non-native) dependencies in manifest order.
    pub fn modules(&self) -> impl Iterator<Item = &DependencyRef> {
        self.entries.iter().filter(|d| !d.is_native())
    }

    /// Lookups compare logical names ASCII case-insensitively.
    pub fn find_module(&self, name: &str) -> Option<&DependencyRef> {
        self.modules().find(|d| d.name.eq_ignore_ascii_case(name))
    }

    pub fn find_native(&self, name: &str) -> Option<&DependencyRef> {
        self.entries
            .iter()
            .filter(|d| d.is_native())
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Extra probing roots declared by the component itself.
    pub fn probing_paths(&self) -> &[PathBuf] {
        &self.probing_paths
    }
}

/// `Orders.module` → `Orders`, `Orders.module.json` → `Orders`.
pub(crate) fn strip_module_extension(file_name: &str) -> &str {
    crate::loader::platform::MODULE_EXTENSIONS
        .iter()
        .find_map(|ext| file_name.strip_suffix(ext))
        .unwrap_or(file_name)
}

/// Compare two module files by version metadata.
pub fn compare_module_files(first: &Path, second: &Path) -> Ordering {
    ModuleImage::probe_version(first).cmp(&ModuleImage::probe_version(second))
}
