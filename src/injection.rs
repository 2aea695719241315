use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

pub const HEADER: &str = "header";
pub const FOOTER: &str = "footer";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Component {
    #[serde(rename = "Type", default = "default_component_kind")]
    pub kind: String,
    #[serde(rename = "Config", default)]
    pub config: BTreeMap<String, Value>,
}

fn default_component_kind() -> String {
    "text".to_string()
}

impl Component {
    pub fn text(content: impl Into<String>) -> Self {
        let mut config = BTreeMap::new();
        config.insert("content".to_string(), Value::String(content.into()));
        Self {
            kind: default_component_kind(),
            config,
        }
    }

    pub fn content(&self) -> String {
        ["content", "text", "label"]
            .iter()
            .find_map(|key| self.config.get(*key))
            .map(|value| match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default()
    }

    pub fn color(&self) -> Option<&str> {
        self.config.get("color").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Injection {
    pub location: String,
    pub priority: i64,
    pub component: Component,
    pub source: String,
}

/// Plugin widgets keyed by location. Entries are only ever added.
#[derive(Default)]
pub struct InjectionRegistry {
    entries: RwLock<HashMap<String, Vec<(u64, Injection)>>>,
    next_seq: AtomicU64,
}

impl InjectionRegistry {
    pub fn add(&self, injection: Injection) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(injection.location.to_ascii_lowercase())
            .or_default()
            .push((seq, injection));
    }

    /// Ascending priority, ties broken by insertion order.
    pub fn render(&self, location: &str) -> Vec<Injection> {
        let mut items = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&location.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default();
        items.sort_by_key(|(seq, injection)| (injection.priority, *seq));
        items.into_iter().map(|(_, injection)| injection).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
