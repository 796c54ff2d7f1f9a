//! The timeline descriptor: where the history ends and where the node is.

use crate::error::{DynamicsError, Result};
use crate::node::Node;
use crate::params::ParameterSet;

/// Storage key of the single descriptor record. Disjoint from every node key.
pub const TIMELINE_KEY: &[u8] = b"dl";

const ENCODED_LEN: usize = 8;

/// `epoch_last_updated` always equals the head node's epoch. `current_epoch`
/// is the operating cursor and need not coincide with any node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeline {
    epoch_last_updated: u32,
    current_epoch: u32,
}

impl Timeline {
    pub fn new(epoch_last_updated: u32, current_epoch: u32) -> Result<Self> {
        let timeline = Self {
            epoch_last_updated,
            current_epoch,
        };
        if !timeline.is_valid() {
            return Err(DynamicsError::ZeroEpoch);
        }
        Ok(timeline)
    }

    pub fn epoch_last_updated(&self) -> u32 {
        self.epoch_last_updated
    }

    pub fn set_epoch_last_updated(&mut self, epoch: u32) -> Result<()> {
        if epoch == 0 {
            return Err(DynamicsError::ZeroEpoch);
        }
        self.epoch_last_updated = epoch;
        Ok(())
    }

    pub fn current_epoch(&self) -> u32 {
        self.current_epoch
    }

    pub fn set_current_epoch(&mut self, epoch: u32) -> Result<()> {
        if epoch == 0 {
            return Err(DynamicsError::ZeroEpoch);
        }
        self.current_epoch = epoch;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.epoch_last_updated != 0 && self.current_epoch != 0
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        if !self.is_valid() {
            return Err(DynamicsError::ZeroEpoch);
        }
        let mut out = Vec::with_capacity(ENCODED_LEN);
        out.extend_from_slice(&self.epoch_last_updated.to_be_bytes());
        out.extend_from_slice(&self.current_epoch.to_be_bytes());
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; ENCODED_LEN] = bytes.try_into().map_err(|_| {
            DynamicsError::Corrupt(format!(
                "timeline record is {} bytes, expected {ENCODED_LEN}",
                bytes.len()
            ))
        })?;
        let [a, b, c, d, e, f, g, h] = bytes;
        let timeline = Self {
            epoch_last_updated: u32::from_be_bytes([a, b, c, d]),
            current_epoch: u32::from_be_bytes([e, f, g, h]),
        };
        if !timeline.is_valid() {
            return Err(DynamicsError::Corrupt(
                "timeline record holds a zero epoch".into(),
            ));
        }
        Ok(timeline)
    }
}

/// Seed a timeline at `epoch`: one node that is both head and tail, and a
/// descriptor whose head and cursor both point at it.
pub fn create_timeline(epoch: u32, params: &ParameterSet) -> Result<(Node, Timeline)> {
    if epoch == 0 {
        return Err(DynamicsError::ZeroEpoch);
    }
    let node = Node::singleton(epoch, params.copy()?)?;
    if !node.is_valid() {
        return Err(DynamicsError::InvalidNode {
            epoch,
            reason: "seed node failed validation",
        });
    }
    Ok((node, Timeline::new(epoch, epoch)?))
}
