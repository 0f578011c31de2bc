//! Storage for published target values.
//!
//! A node keeps two local maps: values a tech provided directly (`tech data`)
//! and values that went through the completion path (`resolved data`).
//! Values attributed to other nodes live in a [`NodeRegistry`] owned by the
//! scheduler and shared between nodes.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::core::{TargetValue, basename, unmask};

type TargetMap = HashMap<String, TargetValue>;

#[derive(Default)]
pub(crate) struct TargetStore {
    tech_data: RwLock<TargetMap>,
    resolved: RwLock<TargetMap>,
}

impl TargetStore {
    pub(crate) fn provide(&self, target: String, value: TargetValue) {
        let mut map = self.tech_data.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(target, value);
    }

    pub(crate) fn read(&self, target: &str) -> Option<TargetValue> {
        let map = self.tech_data.read().unwrap_or_else(PoisonError::into_inner);
        map.get(target).cloned()
    }

    pub(crate) fn resolve(&self, target: String, value: TargetValue) {
        let mut map = self.resolved.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(target, value);
    }

    pub(crate) fn read_resolved(&self, target: &str) -> Option<TargetValue> {
        let map = self.resolved.read().unwrap_or_else(PoisonError::into_inner);
        map.get(target).cloned()
    }
}

/// Values published on behalf of nodes, addressed by build-relative node path.
///
/// Cloning the registry yields another handle to the same data. Writes
/// overwrite per target name; nothing is ever removed unless the owner calls
/// [`NodeRegistry::invalidate`].
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: Arc<RwLock<HashMap<String, TargetMap>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` for `target` of `node_path`. Masks in `target` are
    /// expanded against the basename of `node_path`.
    pub fn publish(&self, node_path: &str, target: &str, value: TargetValue) {
        let target = unmask(target, basename(node_path));
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        nodes
            .entry(node_path.to_string())
            .or_default()
            .insert(target, value);
    }

    pub fn lookup(&self, node_path: &str, target: &str) -> Option<TargetValue> {
        let target = unmask(target, basename(node_path));
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.get(node_path).and_then(|node| node.get(&target)).cloned()
    }

    /// Drops everything published for `node_path`, returning whether anything
    /// was there.
    pub fn invalidate(&self, node_path: &str) -> bool {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        nodes.remove(node_path).is_some()
    }

    pub fn contains_node(&self, node_path: &str) -> bool {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.contains_key(node_path)
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("NodeRegistry")
            .field("nodes", &nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}
