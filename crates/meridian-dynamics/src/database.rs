//! Persistence gateway and the typed record layer on top of it.
//!
//! `KeyValueStore` is the byte-level contract a backend implements. `Database`
//! turns it into typed reads and writes of nodes and the timeline descriptor.
//! `Changeset` stages the records touched by one logical operation so they
//! reach the backend in a single `write_batch`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{DynamicsError, Result};
use crate::node::{node_key, Node};
use crate::timeline::{Timeline, TIMELINE_KEY};

/// Byte-key/byte-value backend.
///
/// A missing key is `Ok(None)`, never an error. Implementations must be safe
/// to share across threads; the coordinator serializes its own writes.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove `key`. Returns whether it was present.
    fn delete(&self, key: &[u8]) -> Result<bool>;

    /// Write several records at once.
    ///
    /// The default issues one `set` per entry and is NOT atomic: a failure
    /// part way leaves the earlier entries written. Backends that can do
    /// better should override it.
    fn write_batch(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Database {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Node at `epoch`, which must exist.
    pub fn get_node(&self, epoch: u32) -> Result<Node> {
        let key = node_key(epoch)?;
        let bytes = self
            .store
            .get(&key)?
            .ok_or(DynamicsError::KeyNotPresent { key })?;
        let node = Node::decode(&bytes)?;
        if node.epoch() != epoch {
            return Err(DynamicsError::Corrupt(format!(
                "record under epoch {epoch} describes epoch {}",
                node.epoch()
            )));
        }
        if !node.is_valid() {
            return Err(DynamicsError::InvalidNode {
                epoch,
                reason: "stored node is not linked",
            });
        }
        Ok(node)
    }

    pub fn set_node(&self, node: &Node) -> Result<()> {
        let (key, value) = node_entry(node)?;
        self.store.set(&key, &value)
    }

    /// The descriptor, which must exist.
    pub fn get_timeline(&self) -> Result<Timeline> {
        self.try_get_timeline()?
            .ok_or_else(|| DynamicsError::KeyNotPresent {
                key: TIMELINE_KEY.to_vec(),
            })
    }

    /// The descriptor, or `None` on a database that has never been bootstrapped.
    pub fn try_get_timeline(&self) -> Result<Option<Timeline>> {
        match self.store.get(TIMELINE_KEY)? {
            Some(bytes) => Timeline::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn set_timeline(&self, timeline: &Timeline) -> Result<()> {
        self.store.set(TIMELINE_KEY, &timeline.encode()?)
    }

    pub(crate) fn write_batch(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        self.store.write_batch(entries)
    }
}

fn node_entry(node: &Node) -> Result<(Vec<u8>, Vec<u8>)> {
    if !node.is_valid() {
        return Err(DynamicsError::InvalidNode {
            epoch: node.epoch(),
            reason: "refusing to persist an unlinked node",
        });
    }
    Ok((node_key(node.epoch())?, node.encode()?))
}

/// Records staged by one logical operation.
///
/// Reads see staged records first, so a multi-step walk observes its own
/// writes. Nothing reaches the backend until `commit`.
pub(crate) struct Changeset<'a> {
    db: &'a Database,
    nodes: BTreeMap<u32, Node>,
    timeline: Option<Timeline>,
}

impl<'a> Changeset<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self {
            db,
            nodes: BTreeMap::new(),
            timeline: None,
        }
    }

    pub(crate) fn node(&self, epoch: u32) -> Result<Node> {
        match self.nodes.get(&epoch) {
            Some(node) => Ok(node.clone()),
            None => self.db.get_node(epoch),
        }
    }

    pub(crate) fn put_node(&mut self, node: Node) {
        self.nodes.insert(node.epoch(), node);
    }

    pub(crate) fn timeline(&self) -> Result<Timeline> {
        match self.timeline {
            Some(timeline) => Ok(timeline),
            None => self.db.get_timeline(),
        }
    }

    pub(crate) fn put_timeline(&mut self, timeline: Timeline) {
        self.timeline = Some(timeline);
    }

    pub(crate) fn staged_epochs(&self) -> impl Iterator<Item = u32> + '_ {
        self.nodes.keys().copied()
    }

    /// Encode everything staged and hand it to the backend in one batch.
    pub(crate) fn commit(self) -> Result<usize> {
        let mut entries = Vec::with_capacity(self.nodes.len() + 1);
        for node in self.nodes.values() {
            entries.push(node_entry(node)?);
        }
        if let Some(timeline) = &self.timeline {
            entries.push((TIMELINE_KEY.to_vec(), timeline.encode()?));
        }
        if entries.is_empty() {
            return Ok(0);
        }
        self.db.write_batch(&entries)?;
        Ok(entries.len())
    }
}
