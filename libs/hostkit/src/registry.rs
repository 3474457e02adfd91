//! In-process registry of component factories.
//!
//! Factory crates register themselves at link time:
//!
//! ```rust,ignore
//! hostkit::inventory::submit! {
//!     hostkit::FactoryRegistration::new("heartbeat", || Box::new(HeartbeatFactory))
//! }
//! ```
//!
//! A module image exports the factory by listing `component_factory:heartbeat`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;

use crate::contracts::ComponentFactory;

type FactoryCtor = Arc<dyn Fn() -> Arc<dyn ComponentFactory> + Send + Sync>;

/// Submitted via `inventory::submit!` by crates that provide factories.
pub struct FactoryRegistration {
    pub id: &'static str,
    pub create: fn() -> Box<dyn ComponentFactory>,
}

impl FactoryRegistration {
    pub const fn new(id: &'static str, create: fn() -> Box<dyn ComponentFactory>) -> Self {
        Self { id, create }
    }
}

inventory::collect!(FactoryRegistration);

/// Factory constructors keyed by capability id.
#[derive(Clone, Default)]
pub struct FactoryRegistry {
    ctors: HashMap<String, FactoryCtor>,
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.ctors.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("FactoryRegistry").field("factories", &ids).finish()
    }
}

impl FactoryRegistry {
    /// Collect every `FactoryRegistration` linked into the binary.
    pub fn discover() -> Result<Self, RegistryError> {
        let mut b = FactoryRegistryBuilder::default();
        for r in ::inventory::iter::<FactoryRegistration> {
            b.register_fn(r.id, r.create);
        }
        b.build()
    }

    pub fn builder() -> FactoryRegistryBuilder {
        FactoryRegistryBuilder::default()
    }

    /// Create a fresh factory instance for `id`.
    pub fn instantiate(&self, id: &str) -> Option<Arc<dyn ComponentFactory>> {
        self.ctors.get(id).map(|ctor| ctor())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ctors.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ctors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ctors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ctors.is_empty()
    }
}

/// Builder used by discovery and tests; duplicate ids are reported at build time.
#[derive(Default)]
pub struct FactoryRegistryBuilder {
    ctors: HashMap<String, FactoryCtor>,
    duplicates: BTreeMap<String, usize>,
}

impl FactoryRegistryBuilder {
    pub fn register_fn(&mut self, id: &str, create: fn() -> Box<dyn ComponentFactory>) -> &mut Self {
        self.insert(
            id,
            Arc::new(move || -> Arc<dyn ComponentFactory> { Arc::from(create()) }),
        )
    }

    /// Register a shared instance; every instantiation returns the same factory.
    pub fn register(&mut self, id: &str, factory: Arc<dyn ComponentFactory>) -> &mut Self {
        self.insert(id, Arc::new(move || factory.clone()))
    }

    fn insert(&mut self, id: &str, ctor: FactoryCtor) -> &mut Self {
        if self.ctors.contains_key(id) {
            *self.duplicates.entry(id.to_string()).or_insert(1) += 1;
        } else {
            self.ctors.insert(id.to_string(), ctor);
        }
        self
    }

    pub fn build(&mut self) -> Result<FactoryRegistry, RegistryError> {
        if !self.duplicates.is_empty() {
            let errors = self
                .duplicates
                .iter()
                .map(|(id, n)| format!("Factory '{id}' is registered {n} times"))
                .collect();
            return Err(RegistryError::InvalidRegistryConfiguration { errors });
        }
        let ctors = std::mem::take(&mut self.ctors);

        let mut ids: Vec<&str> = ctors.keys().map(String::as_str).collect();
        ids.sort_unstable();
        tracing::info!(factories = ?ids, "Component factories registered");

        Ok(FactoryRegistry { ctors })
    }
}

/// Structured errors for the factory registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid factory registry configuration:\n{errors:#?}")]
    InvalidRegistryConfiguration { errors: Vec<String> },
}
