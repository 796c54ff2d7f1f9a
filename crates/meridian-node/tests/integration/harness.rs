//! Test harness: a node config pointing at a throwaway SQLite file.

use std::path::PathBuf;

use meridian_dynamics::Storage;
use meridian_node::config::NodeConfig;
use meridian_node::open_storage;

pub struct TestNode {
    pub config: NodeConfig,
    _tempdir: tempfile::TempDir,
}

#[allow(dead_code)]
impl TestNode {
    pub fn new() -> Self {
        Self::with_bootstrap_epoch(None)
    }

    pub fn with_bootstrap_epoch(epoch: Option<u32>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NodeConfig::default();
        config.node.database = dir
            .path()
            .join("data")
            .join("dynamics.db")
            .to_string_lossy()
            .into_owned();
        config.dynamics.bootstrap_current_epoch = epoch;
        Self {
            config,
            _tempdir: dir,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.config.node.database)
    }

    /// Open a fresh `Storage` over the node's database, as a process restart would.
    pub fn open(&self) -> Storage {
        open_storage(&self.config).unwrap()
    }
}
