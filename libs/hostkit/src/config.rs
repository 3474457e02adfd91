//! Resolved configuration handed to component factories.
//!
//! The host owns a [`ConfigSource`]; every component receives a [`ComponentConfig`]
//! view onto it. Keys are `:`-separated paths (`"heartbeat:interval_ms"`), object
//! keys match case-insensitively and numeric segments index arrays.

use std::sync::Arc;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;

/// Host side of the configuration tree.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    tx: Arc<watch::Sender<Arc<Value>>>,
}

impl Default for ConfigSource {
    fn default() -> Self {
        Self::new(Value::Object(Default::default()))
    }
}

impl ConfigSource {
    pub fn new(root: Value) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(root));
        Self { tx: Arc::new(tx) }
    }

    /// Publish a new tree; subscribers are notified.
    pub fn reload(&self, root: Value) {
        self.tx.send_replace(Arc::new(root));
        tracing::debug!("Component configuration reloaded");
    }

    /// Root view for a component.
    pub fn view(&self) -> ComponentConfig {
        ComponentConfig {
            rx: self.tx.subscribe(),
            prefix: Vec::new(),
        }
    }
}

/// Read-only view onto the configuration tree, optionally scoped to a section.
#[derive(Debug, Clone)]
pub struct ComponentConfig {
    rx: watch::Receiver<Arc<Value>>,
    prefix: Vec<String>,
}

impl ComponentConfig {
    /// Value at `key` relative to this view, cloned out of the current tree.
    pub fn get(&self, key: &str) -> Option<Value> {
        let root = self.rx.borrow().clone();
        let scoped = lookup(&root, self.prefix.iter().map(String::as_str))?;
        lookup(scoped, split_key(key)).cloned()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| match v {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    /// Nested view; it follows reloads of the underlying tree.
    pub fn section(&self, key: &str) -> ComponentConfig {
        let mut prefix = self.prefix.clone();
        prefix.extend(split_key(key).map(str::to_string));
        ComponentConfig {
            rx: self.rx.clone(),
            prefix,
        }
    }

    /// Current subtree for this view; `Null` when the section does not exist.
    pub fn snapshot(&self) -> Value {
        let root = self.rx.borrow().clone();
        lookup(&root, self.prefix.iter().map(String::as_str))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Deserialize this view into `T`. A missing section deserializes from an empty object.
    pub fn bind<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let value = match self.snapshot() {
            Value::Null => Value::Object(Default::default()),
            v => v,
        };
        serde_json::from_value(value).with_context(|| {
            format!("failed to bind configuration section '{}'", self.prefix.join(":"))
        })
    }

    /// Change notifications for the whole tree.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Value>> {
        self.rx.clone()
    }
}

fn split_key(key: &str) -> impl Iterator<Item = &str> {
    key.split(':').filter(|s| !s.is_empty())
}

fn lookup<'a, 'k>(root: &'a Value, path: impl Iterator<Item = &'k str>) -> Option<&'a Value> {
    let mut cur = root;
    for seg in path {
        cur = match cur {
            Value::Object(map) => match map.get(seg) {
                Some(v) => v,
                None => map
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(seg))
                    .map(|(_, v)| v)?,
            },
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn get_is_case_insensitive_and_indexes_arrays() {
        let src = ConfigSource::new(json!({
            "Heartbeat": { "IntervalMs": 250, "tags": ["a", "b"] }
        }));
        let cfg = src.view();
        assert_eq!(cfg.get("heartbeat:intervalms"), Some(json!(250)));
        assert_eq!(cfg.get_str("heartbeat:tags:1").as_deref(), Some("b"));
        assert_eq!(cfg.get("heartbeat:missing"), None);
        assert_eq!(cfg.get("heartbeat:tags:9"), None);
    }

    #[test]
    fn section_bind_and_missing_section() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Hb {
            #[serde(default)]
            interval_ms: u64,
        }

        let src = ConfigSource::new(json!({ "heartbeat": { "interval_ms": 10 } }));
        let hb: Hb = src.view().section("heartbeat").bind().unwrap();
        assert_eq!(hb, Hb { interval_ms: 10 });

        let missing: Hb = src.view().section("nope").bind().unwrap();
        assert_eq!(missing, Hb { interval_ms: 0 });
        assert_eq!(src.view().section("nope").snapshot(), Value::Null);
    }

    #[tokio::test]
    async fn reload_notifies_subscribers() {
        let src = ConfigSource::new(json!({ "a": 1 }));
        let cfg = src.view().section("a");
        let mut rx = cfg.subscribe();

        src.reload(json!({ "a": 2 }));
        rx.changed().await.unwrap();
        assert_eq!(cfg.snapshot(), json!(2));
    }
}
