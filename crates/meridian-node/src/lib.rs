//! Meridian Node -- library crate behind the operator binary.
//!
//! Opens the SQLite-backed dynamics store described by the config and
//! renders its contents for the CLI. Integration tests drive it directly.

pub mod config;

use std::path::PathBuf;
use std::sync::Arc;

use meridian_dynamics::{Database, KeyValueStore, ParameterSet, Storage};
use meridian_store::SqliteStore;
use serde::Serialize;

use crate::config::NodeConfig;

pub const DEFAULT_LOG_FILTER: &str = "meridian_node=info,meridian_dynamics=info";

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs_or_home() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn dirs_or_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Install the global subscriber. `RUST_LOG` wins over the config filter,
/// which wins over `DEFAULT_LOG_FILTER`.
pub fn init_tracing(config_filter: Option<&str>) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        config_filter
            .unwrap_or(DEFAULT_LOG_FILTER)
            .into()
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Open the configured database and bring a `Storage` to the ready state.
pub fn open_storage(cfg: &NodeConfig) -> anyhow::Result<Storage> {
    let db_path = expand_tilde(&cfg.node.database);
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&db_path)?);
    open_with_store(store, cfg)
}

/// Same as `open_storage`, over an already opened backend.
pub fn open_with_store(store: Arc<dyn KeyValueStore>, cfg: &NodeConfig) -> anyhow::Result<Storage> {
    let first_run = Database::new(store.clone()).try_get_timeline()?.is_none();

    let storage = Storage::new();
    storage.init(store)?;
    storage.start()?;

    if first_run {
        if let Some(epoch) = cfg.dynamics.bootstrap_current_epoch {
            storage.advance_to(epoch)?;
            tracing::info!(epoch, "node: moved bootstrap cursor");
        }
    }
    Ok(storage)
}

pub fn render_parameters(params: &ParameterSet) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(params)?)
}

#[derive(Serialize)]
struct HistoryEntry<'a> {
    epoch: u32,
    parameters: &'a ParameterSet,
}

/// Tail-to-head change points as a JSON array of `{epoch, parameters}`.
pub fn render_history(storage: &Storage) -> anyhow::Result<String> {
    let history = storage.history()?;
    let entries: Vec<HistoryEntry<'_>> = history
        .iter()
        .map(|(epoch, parameters)| HistoryEntry {
            epoch: *epoch,
            parameters,
        })
        .collect();
    Ok(serde_json::to_string_pretty(&entries)?)
}
