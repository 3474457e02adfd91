//! Factory discovery over the modules loaded into a boundary.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ComponentConfig;
use crate::contracts::{HostableComponent, ModuleLoader};
use crate::error::HostError;
use crate::loader::IsolationBoundary;
use crate::registry::FactoryRegistry;

/// What a factory receives when asked to construct units.
#[derive(Clone)]
pub struct FactoryContext {
    component_path: PathBuf,
    factory_id: String,
    loader: Arc<dyn ModuleLoader>,
    config: ComponentConfig,
}

impl FactoryContext {
    pub fn new(
        component_path: impl Into<PathBuf>,
        factory_id: impl Into<String>,
        loader: Arc<dyn ModuleLoader>,
        config: ComponentConfig,
    ) -> Self {
        Self {
            component_path: component_path.into(),
            factory_id: factory_id.into(),
            loader,
            config,
        }
    }

    pub fn component_path(&self) -> &Path {
        &self.component_path
    }

    pub fn factory_id(&self) -> &str {
        &self.factory_id
    }

    /// Loads further modules through the same isolation boundary.
    pub fn loader(&self) -> &Arc<dyn ModuleLoader> {
        &self.loader
    }

    pub fn config(&self) -> &ComponentConfig {
        &self.config
    }
}

/// Factory ids exported by the boundary's modules, in load order, first occurrence wins.
pub fn exported_factory_ids(boundary: &IsolationBoundary) -> Vec<String> {
    let mut seen = HashSet::new();
    boundary
        .loaded_modules()
        .iter()
        .flat_map(|m| m.factory_ids().map(str::to_string).collect::<Vec<_>>())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Instantiate every exported factory and collect the units they construct.
///
/// No exported factory is not an error: the component simply has no units.
pub fn discover_units(
    boundary: &Arc<IsolationBoundary>,
    registry: &FactoryRegistry,
    config: &ComponentConfig,
) -> Result<Vec<Arc<dyn HostableComponent>>, HostError> {
    let component = boundary.component().to_string();
    let mut units = Vec::new();

    for id in exported_factory_ids(boundary) {
        let factory = registry.instantiate(&id).ok_or_else(|| HostError::Factory {
            component: component.clone(),
            factory: id.clone(),
            source: anyhow::anyhow!("no factory registered under '{id}'"),
        })?;

        let loader: Arc<dyn ModuleLoader> = boundary.clone();
        let ctx = FactoryContext::new(&component, id.clone(), loader, config.clone());
        let created = factory
            .create_units(&ctx)
            .map_err(|source| HostError::Factory {
                component: component.clone(),
                factory: id.clone(),
                source,
            })?;

        tracing::debug!(component = %component, factory = %id, units = created.len(), "Factory constructed units");
        units.extend(created);
    }

    if units.is_empty() {
        tracing::debug!(component = %component, "No runnable units exported");
    }
    Ok(units)
}
