//! The catalog of semantic edits to `daemon.json`.
//!
//! Each edit is a pure function from document to document. Whether an edit
//! changed anything is decided by comparing the keys it owns before and after,
//! never by the fact that it was requested.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::network::{AddressPool, Cidr};
use crate::classify::Category;

pub const SYSBOX_RUNTIME: &str = "sysbox-runc";
pub const SYSBOX_RUNTIME_PATH: &str = "/usr/bin/sysbox-runc";
/// Identity written to `userns-remap` when remapping is enabled.
pub const USERNS_REMAP_USER: &str = "sysbox";

const RUNTIMES: &str = "runtimes";
const DEFAULT_RUNTIME: &str = "default-runtime";
const USERNS_REMAP: &str = "userns-remap";
const BIP: &str = "bip";
const ADDRESS_POOLS: &str = "default-address-pools";
const FEATURES: &str = "features";
const CONTAINERD_SNAPSHOTTER: &str = "containerd-snapshotter";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// Add `runtimes.<name>` unless an entry by that name already exists.
    RegisterRuntime { name: String, path: String },
    /// Delete `runtimes.<name>`, and `default-runtime` if it names it.
    RemoveRuntime { name: String },
    DefaultRuntime(String),
    /// Set `userns-remap` unless the user already picked a value.
    EnableUsernsRemap,
    DisableUsernsRemap,
    ContainerdImageStore(bool),
    Bip(Cidr),
    DefaultAddressPool(AddressPool),
}

impl Edit {
    pub fn register_sysbox() -> Self {
        Edit::RegisterRuntime {
            name: SYSBOX_RUNTIME.to_string(),
            path: SYSBOX_RUNTIME_PATH.to_string(),
        }
    }

    pub fn remove_sysbox() -> Self {
        Edit::RemoveRuntime {
            name: SYSBOX_RUNTIME.to_string(),
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Edit::RegisterRuntime { .. } | Edit::RemoveRuntime { .. } | Edit::DefaultRuntime(_) => {
                Category::Runtime
            }
            Edit::EnableUsernsRemap | Edit::DisableUsernsRemap => Category::Identity,
            Edit::ContainerdImageStore(_) => Category::ImageStore,
            Edit::Bip(_) | Edit::DefaultAddressPool(_) => Category::Network,
        }
    }

    /// JSON pointers to every value this edit may touch.
    fn owned_keys(&self) -> &'static [&'static str] {
        match self {
            Edit::RegisterRuntime { .. } => &["/runtimes"],
            Edit::RemoveRuntime { .. } => &["/runtimes", "/default-runtime"],
            Edit::DefaultRuntime(_) => &["/default-runtime"],
            Edit::EnableUsernsRemap | Edit::DisableUsernsRemap => &["/userns-remap"],
            Edit::ContainerdImageStore(_) => &["/features/containerd-snapshotter"],
            Edit::Bip(_) => &["/bip"],
            Edit::DefaultAddressPool(_) => &["/default-address-pools"],
        }
    }
}

/// An edit that produced a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub edit: Edit,
    pub category: Category,
}

/// Apply one edit, returning the new document.
pub fn apply(doc: &Value, edit: &Edit) -> Value {
    let mut next = doc.clone();
    let root = as_object(&mut next);

    match edit {
        Edit::RegisterRuntime { name, path } => {
            let runtimes = child_object(root, RUNTIMES);
            if !runtimes.contains_key(name) {
                let mut entry = Map::new();
                entry.insert("path".to_string(), Value::String(path.clone()));
                runtimes.insert(name.clone(), Value::Object(entry));
            }
        }
        Edit::RemoveRuntime { name } => {
            if let Some(runtimes) = root.get_mut(RUNTIMES).and_then(Value::as_object_mut) {
                runtimes.remove(name);
            }
            if root.get(DEFAULT_RUNTIME).and_then(Value::as_str) == Some(name.as_str()) {
                root.remove(DEFAULT_RUNTIME);
            }
        }
        Edit::DefaultRuntime(name) => {
            root.insert(DEFAULT_RUNTIME.to_string(), Value::String(name.clone()));
        }
        Edit::EnableUsernsRemap => {
            let current = root.get(USERNS_REMAP).and_then(Value::as_str).unwrap_or("");
            if current.is_empty() {
                root.insert(
                    USERNS_REMAP.to_string(),
                    Value::String(USERNS_REMAP_USER.to_string()),
                );
            }
        }
        Edit::DisableUsernsRemap => {
            root.remove(USERNS_REMAP);
        }
        Edit::ContainerdImageStore(enabled) => {
            child_object(root, FEATURES)
                .insert(CONTAINERD_SNAPSHOTTER.to_string(), Value::Bool(*enabled));
        }
        Edit::Bip(cidr) => {
            root.insert(BIP.to_string(), Value::String(cidr.to_string()));
        }
        Edit::DefaultAddressPool(pool) => {
            root.insert(
                ADDRESS_POOLS.to_string(),
                Value::Array(vec![pool.to_json()]),
            );
        }
    }

    next
}

/// Apply edits in order and report those that changed the document.
pub fn apply_all(doc: &Value, edits: &[Edit]) -> (Value, Vec<Applied>) {
    let mut current = doc.clone();
    let mut applied = Vec::new();

    for edit in edits {
        let next = apply(&current, edit);
        let changed = edit
            .owned_keys()
            .iter()
            .any(|key| current.pointer(key) != next.pointer(key));
        debug!(?edit, changed, "edit:applied");
        if changed {
            applied.push(Applied {
                edit: edit.clone(),
                category: edit.category(),
            });
        }
        current = next;
    }

    (current, applied)
}

fn as_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

/// Get `parent[key]` as an object, creating it (or replacing a non-object).
fn child_object<'a>(parent: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    let slot = parent
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        warn!(key, "replacing non-object value in daemon.json");
    }
    as_object(slot)
}
