//! Epoch-indexed store for governance-tunable protocol parameters.
//!
//! Every enacted change is recorded as a full `ParameterSet` snapshot at the
//! epoch it takes effect. Snapshots form a doubly-linked timeline persisted
//! through a `KeyValueStore`; `Storage` answers "which parameters are active
//! at epoch N" and applies new changes from an epoch forward without
//! rewriting anything before it.

pub mod database;
pub mod error;
pub mod memory;
pub mod node;
pub mod params;
pub mod storage;
pub mod timeline;

pub use database::{Database, KeyValueStore};
pub use error::{DynamicsError, Result};
pub use memory::MemoryStore;
pub use node::{node_key, Node, NODE_PREFIX};
pub use params::{Field, ParameterSet, MAX_DURATION};
pub use storage::{ParameterReader, Phase, Storage, GENESIS_EPOCH};
pub use timeline::{create_timeline, Timeline, TIMELINE_KEY};
