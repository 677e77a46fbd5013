use std::collections::HashMap;

use serde_json::Value;

use crate::error::PennsieveError;
use crate::node::DataNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(usize);

#[derive(Debug)]
struct CacheEntry {
    node: DataNode,
    synced: Option<Value>,
}

#[derive(Debug, Default)]
pub struct ObjectCache {
    entries: Vec<CacheEntry>,
    index: HashMap<String, NodeKey>,
    snapshots: HashMap<String, Value>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: DataNode) -> NodeKey {
        let key = NodeKey(self.entries.len());
        if let Some(id) = &node.id {
            self.index.insert(id.clone(), key);
        }
        self.entries.push(CacheEntry { node, synced: None });
        key
    }

    pub fn absorb(&mut self, node: DataNode) -> NodeKey {
        match node.id.as_deref().and_then(|id| self.lookup(id)) {
            Some(key) => {
                self.replace(key, node);
                key
            }
            None => {
                let key = self.insert(node);
                self.mark_synced(key);
                key
            }
        }
    }

    /// Overwrites the state behind `key` with server state. Items already
    /// loaded survive a response that carries no children.
    pub fn replace(&mut self, key: NodeKey, mut node: DataNode) {
        let Some(entry) = self.entries.get_mut(key.0) else {
            return;
        };
        if node.items.is_none() {
            node.items = entry.node.items.take();
        }
        if let Some(old) = entry.node.id.as_ref().filter(|old| Some(*old) != node.id.as_ref()) {
            self.index.remove(old);
        }
        if let Some(id) = &node.id {
            self.index.insert(id.clone(), key);
        }
        entry.synced = Some(node.request_body());
        entry.node = node;
    }

    pub fn get(&self, key: NodeKey) -> Option<&DataNode> {
        self.entries.get(key.0).map(|entry| &entry.node)
    }

    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut DataNode> {
        self.entries.get_mut(key.0).map(|entry| &mut entry.node)
    }

    pub fn node(&self, key: NodeKey) -> Result<&DataNode, PennsieveError> {
        self.get(key)
            .ok_or_else(|| PennsieveError::NotFound(format!("node handle {}", key.0)))
    }

    pub fn node_mut(&mut self, key: NodeKey) -> Result<&mut DataNode, PennsieveError> {
        self.get_mut(key)
            .ok_or_else(|| PennsieveError::NotFound(format!("node handle {}", key.0)))
    }

    pub fn lookup(&self, id: &str) -> Option<NodeKey> {
        self.index.get(id).copied()
    }

    pub fn forget(&mut self, key: NodeKey) {
        if let Some(entry) = self.entries.get_mut(key.0) {
            if let Some(id) = entry.node.id.take() {
                self.index.remove(&id);
            }
            entry.node.parent = None;
            entry.synced = None;
        }
    }

    pub fn mark_synced(&mut self, key: NodeKey) {
        if let Some(entry) = self.entries.get_mut(key.0) {
            entry.synced = Some(entry.node.request_body());
        }
    }

    pub fn is_dirty(&self, key: NodeKey) -> bool {
        self.entries
            .get(key.0)
            .is_some_and(|entry| entry.synced.as_ref() != Some(&entry.node.request_body()))
    }

    pub fn detach(&mut self, key: NodeKey) {
        for entry in &mut self.entries {
            if let Some(items) = entry.node.items.as_mut() {
                items.retain(|item| *item != key);
            }
        }
    }

    pub fn attach(&mut self, container: NodeKey, child: NodeKey) {
        if let Some(items) = self
            .entries
            .get_mut(container.0)
            .and_then(|entry| entry.node.items.as_mut())
            && !items.contains(&child)
        {
            items.push(child);
        }
    }

    pub fn set_items(&mut self, container: NodeKey, items: Vec<NodeKey>) {
        if let Some(entry) = self.entries.get_mut(container.0) {
            entry.node.items = Some(items);
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn snapshot(&mut self, id: &str, body: Value) {
        self.snapshots.insert(id.to_string(), body);
    }

    pub fn matches_snapshot(&self, id: &str, body: &Value) -> bool {
        self.snapshots.get(id) == Some(body)
    }

    pub fn drop_snapshot(&mut self, id: &str) {
        self.snapshots.remove(id);
    }
}
