//! Timeline nodes -- one change point in the epoch-ordered history.
//!
//! The history is a doubly-linked list persisted record by record. Each node
//! names its neighbours by epoch rather than by pointer:
//!
//! ```text
//!   tail                                   head
//!   [e=1, prev=1, next=10] <-> [e=10, prev=1, next=100] <-> [e=100, prev=10, next=100]
//! ```
//!
//! The ends are marked by self-reference. A node is the **head** when
//! `next_epoch == epoch` and the **tail** when `prev_epoch == epoch`. A
//! timeline with a single node has that node as both. A node that has not yet
//! been woven into the list is **pre-linked**: `prev_epoch == next_epoch == 0`.

use crate::error::{DynamicsError, Result};
use crate::params::ParameterSet;

/// Key prefix for node records. The full key is this prefix followed by the
/// big-endian epoch.
pub const NODE_PREFIX: &[u8] = b"dn";

/// Length of the fixed epoch header that precedes the snapshot.
const HEADER_LEN: usize = 12;

/// Storage key for the node recorded at `epoch`.
pub fn node_key(epoch: u32) -> Result<Vec<u8>> {
    if epoch == 0 {
        return Err(DynamicsError::ZeroEpoch);
    }
    let mut key = Vec::with_capacity(NODE_PREFIX.len() + 4);
    key.extend_from_slice(NODE_PREFIX);
    key.extend_from_slice(&epoch.to_be_bytes());
    Ok(key)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    epoch: u32,
    prev_epoch: u32,
    next_epoch: u32,
    snapshot: ParameterSet,
}

impl Node {
    /// A node ready to be linked in at `epoch`.
    pub fn pre_linked(epoch: u32, snapshot: ParameterSet) -> Result<Self> {
        if epoch == 0 {
            return Err(DynamicsError::ZeroEpoch);
        }
        Ok(Self {
            epoch,
            prev_epoch: 0,
            next_epoch: 0,
            snapshot,
        })
    }

    /// The only node of a fresh timeline: head and tail at once.
    pub(crate) fn singleton(epoch: u32, snapshot: ParameterSet) -> Result<Self> {
        if epoch == 0 {
            return Err(DynamicsError::ZeroEpoch);
        }
        Ok(Self {
            epoch,
            prev_epoch: epoch,
            next_epoch: epoch,
            snapshot,
        })
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn prev_epoch(&self) -> u32 {
        self.prev_epoch
    }

    pub fn next_epoch(&self) -> u32 {
        self.next_epoch
    }

    pub fn snapshot(&self) -> &ParameterSet {
        &self.snapshot
    }

    pub(crate) fn snapshot_mut(&mut self) -> &mut ParameterSet {
        &mut self.snapshot
    }

    pub fn is_head(&self) -> bool {
        self.epoch == self.next_epoch
    }

    pub fn is_tail(&self) -> bool {
        self.epoch == self.prev_epoch
    }

    /// Linked, correctly ordered, and carrying a persistable snapshot.
    pub fn is_valid(&self) -> bool {
        if self.epoch == 0 || self.prev_epoch == 0 || self.next_epoch == 0 {
            return false;
        }
        if self.prev_epoch > self.epoch || self.epoch > self.next_epoch {
            return false;
        }
        self.snapshot.copy().is_ok()
    }

    /// Ready to be handed to `set_epochs`.
    pub fn is_pre_linked(&self) -> bool {
        if self.epoch == 0 || self.prev_epoch != 0 || self.next_epoch != 0 {
            return false;
        }
        self.snapshot.copy().is_ok()
    }

    pub fn copy(&self) -> Result<Self> {
        if !self.is_valid() {
            return Err(DynamicsError::InvalidNode {
                epoch: self.epoch,
                reason: "cannot copy an unlinked or malformed node",
            });
        }
        Self::decode(&self.encode()?)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let snapshot = self.snapshot.encode()?;
        let mut out = Vec::with_capacity(HEADER_LEN + snapshot.len());
        out.extend_from_slice(&self.epoch.to_be_bytes());
        out.extend_from_slice(&self.prev_epoch.to_be_bytes());
        out.extend_from_slice(&self.next_epoch.to_be_bytes());
        out.extend_from_slice(&snapshot);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(DynamicsError::Corrupt(format!(
                "node record is {} bytes, shorter than its header",
                bytes.len()
            )));
        }
        let epoch = read_u32(&bytes[0..4]);
        let prev_epoch = read_u32(&bytes[4..8]);
        let next_epoch = read_u32(&bytes[8..12]);
        let snapshot = ParameterSet::decode(&bytes[HEADER_LEN..])?;
        Ok(Self {
            epoch,
            prev_epoch,
            next_epoch,
            snapshot,
        })
    }

    /// Weave this pre-linked node into the list between `prev` and `next`.
    ///
    /// Exactly three shapes are accepted:
    ///
    /// 1. `prev` is the head, `next` is absent, `prev.epoch < self.epoch`:
    ///    `self` becomes the new head.
    /// 2. `prev` is absent, `next` is the tail, `self.epoch < next.epoch`:
    ///    `self` becomes the new tail.
    /// 3. `prev` and `next` are adjacent and `prev.epoch < self.epoch < next.epoch`:
    ///    `self` is spliced between them.
    ///
    /// On success every node passed in has its links updated; the caller is
    /// responsible for persisting all of them. On error nothing is modified.
    pub fn set_epochs(&mut self, prev: Option<&mut Node>, next: Option<&mut Node>) -> Result<()> {
        if !self.is_pre_linked() {
            return Err(self.link_error("node is not pre-linked"));
        }
        match (prev, next) {
            (Some(prev), None) => {
                if !prev.is_valid() || !prev.is_head() {
                    return Err(self.link_error("previous node is not the head"));
                }
                if prev.epoch >= self.epoch {
                    return Err(self.link_error("new head must follow the current head"));
                }
                prev.next_epoch = self.epoch;
                self.prev_epoch = prev.epoch;
                self.next_epoch = self.epoch;
                Ok(())
            }
            (None, Some(next)) => {
                if !next.is_valid() || !next.is_tail() {
                    return Err(self.link_error("next node is not the tail"));
                }
                if self.epoch >= next.epoch {
                    return Err(self.link_error("new tail must precede the current tail"));
                }
                next.prev_epoch = self.epoch;
                self.prev_epoch = self.epoch;
                self.next_epoch = next.epoch;
                Ok(())
            }
            (Some(prev), Some(next)) => {
                if !prev.is_valid() || !next.is_valid() {
                    return Err(self.link_error("neighbour is not a valid node"));
                }
                if prev.next_epoch != next.epoch || next.prev_epoch != prev.epoch {
                    return Err(self.link_error("neighbours are not adjacent"));
                }
                if !(prev.epoch < self.epoch && self.epoch < next.epoch) {
                    return Err(self.link_error("epoch does not fall between its neighbours"));
                }
                prev.next_epoch = self.epoch;
                next.prev_epoch = self.epoch;
                self.prev_epoch = prev.epoch;
                self.next_epoch = next.epoch;
                Ok(())
            }
            (None, None) => Err(self.link_error("no neighbour given")),
        }
    }

    fn link_error(&self, reason: &'static str) -> DynamicsError {
        DynamicsError::InvalidLink {
            epoch: self.epoch,
            reason,
        }
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_be_bytes(buf)
}
