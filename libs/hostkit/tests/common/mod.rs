//! Shared fixtures: on-disk component trees and recording units.
#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hostkit::{
    ComponentFactory, ConfigSource, FactoryContext, FactoryRegistry, HostSettings,
    HostableComponent,
};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const RECORDER: &str = "recorder";

/// Lifecycle calls observed across all units, in call order.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: String) {
        self.0.lock().push(entry);
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    FailStart,
    PanicStart,
    SlowStart(Duration),
    PanicPause,
    FailStop,
    PanicStop,
    /// Ignores cancellation and never returns from `stop`.
    HangStop,
}

struct RecordingUnit {
    name: String,
    log: CallLog,
    faults: Vec<Fault>,
}

#[async_trait]
impl HostableComponent for RecordingUnit {
    async fn start(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        for f in &self.faults {
            match f {
                Fault::SlowStart(d) => tokio::time::sleep(*d).await,
                Fault::FailStart => anyhow::bail!("{} refused to start", self.name),
                Fault::PanicStart => panic!("{} blew up while starting", self.name),
                _ => {}
            }
        }
        self.log.push(format!("Start({})", self.name));
        Ok(())
    }

    async fn pause(&self) -> anyhow::Result<()> {
        if self.faults.contains(&Fault::PanicPause) {
            panic!("{} blew up while pausing", self.name);
        }
        self.log.push(format!("Pause({})", self.name));
        Ok(())
    }

    async fn resume(&self) -> anyhow::Result<()> {
        self.log.push(format!("Resume({})", self.name));
        Ok(())
    }

    async fn stop(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        if self.faults.contains(&Fault::HangStop) {
            std::future::pending::<()>().await;
        }
        self.log.push(format!("Stop({})", self.name));
        if self.faults.contains(&Fault::PanicStop) {
            panic!("{} blew up while stopping", self.name);
        }
        if self.faults.contains(&Fault::FailStop) {
            anyhow::bail!("{} exploded while stopping", self.name);
        }
        Ok(())
    }
}

/// Builds one recording unit per component, named after the entry module file stem.
pub struct RecorderFactory {
    pub log: CallLog,
    pub faults: HashMap<String, Vec<Fault>>,
}

impl ComponentFactory for RecorderFactory {
    fn create_units(&self, ctx: &FactoryContext) -> anyhow::Result<Vec<Arc<dyn HostableComponent>>> {
        let name = ctx
            .component_path()
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let faults = self.faults.get(&name).cloned().unwrap_or_default();
        Ok(vec![Arc::new(RecordingUnit {
            name,
            log: self.log.clone(),
            faults,
        })])
    }
}

/// A temporary host tree: `<root>/<Name>/<Name>.module` plus a `shared/` store.
pub struct HostTree {
    pub root: TempDir,
}

impl HostTree {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    pub fn write(&self, rel: &str, body: &str) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        path
    }

    pub fn module(&self, rel: &str, name: &str, version: &str) -> PathBuf {
        self.write(rel, &format!(r#"{{"name":"{name}","version":"{version}"}}"#))
    }

    /// Component exporting the recorder factory, with optional managed dependencies.
    pub fn component(&self, name: &str, deps: &[&str]) -> PathBuf {
        let entry = self.write(
            &format!("{name}/{name}.module"),
            &format!(r#"{{"name":"{name}","version":"1.0","exports":["component_factory:{RECORDER}"]}}"#),
        );
        if !deps.is_empty() {
            let libs: Vec<String> = deps.iter().map(|d| format!(r#"{{"name":"{d}"}}"#)).collect();
            self.write(
                &format!("{name}/{name}.deps.json"),
                &format!(r#"{{"libraries":[{}]}}"#, libs.join(",")),
            );
        }
        entry
    }

    pub fn settings(&self, components: Vec<PathBuf>) -> HostSettings {
        HostSettings {
            components,
            shared_library_path: Some(self.path("shared")),
            stopping_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }
}

pub fn recorder_registry(log: &CallLog, faults: HashMap<String, Vec<Fault>>) -> FactoryRegistry {
    FactoryRegistry::builder()
        .register(
            RECORDER,
            Arc::new(RecorderFactory {
                log: log.clone(),
                faults,
            }),
        )
        .build()
        .unwrap()
}

pub fn empty_config() -> ConfigSource {
    ConfigSource::default()
}

pub fn names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|p| Path::new(p).file_stem()?.to_str().map(str::to_string))
        .collect()
}
