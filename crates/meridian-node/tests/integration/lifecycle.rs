//! Open, update, restart: the operator workflow against a real SQLite file.

use meridian_dynamics::{DynamicsError, ParameterReader, ParameterSet};
use meridian_node::config::NodeConfig;
use meridian_node::{render_history, render_parameters};

use crate::harness::TestNode;

#[test]
fn test_first_open_bootstraps_genesis() {
    let node = TestNode::new();
    let storage = node.open();
    assert!(node.db_path().exists());
    assert_eq!(storage.current_epoch().unwrap(), 1);
    assert_eq!(storage.parameters(), ParameterSet::standard());
}

#[test]
fn test_bootstrap_epoch_applies_only_on_first_run() {
    let node = TestNode::with_bootstrap_epoch(Some(500));
    {
        let storage = node.open();
        assert_eq!(storage.current_epoch().unwrap(), 500);
        storage.advance_to(600).unwrap();
    }
    let storage = node.open();
    assert_eq!(storage.current_epoch().unwrap(), 600);
}

#[test]
fn test_update_visible_after_restart() {
    let node = TestNode::new();
    {
        let storage = node.open();
        storage.update_storage("maxBytes", "12345", 10).unwrap();
        storage
            .update_storage("msgTimeout", "8000000000", 20)
            .unwrap();
    }

    let storage = node.open();
    assert_eq!(storage.max_bytes(), 3_000_000);
    storage.advance_to(25).unwrap();
    assert_eq!(storage.max_bytes(), 12345);
    assert_eq!(storage.msg_timeout().as_secs(), 8);
    assert_eq!(storage.srvr_msg_timeout().as_secs(), 6);
}

#[test]
fn test_rejected_update_leaves_database_unchanged() {
    let node = TestNode::new();
    let storage = node.open();
    storage.update_storage("maxBytes", "12345", 10).unwrap();
    let before = render_history(&storage).unwrap();

    assert!(matches!(
        storage.update_storage("noSuchField", "1", 5),
        Err(DynamicsError::InvalidUpdateValue { .. })
    ));
    assert!(matches!(
        storage.update_storage("maxBytes", "1", 0),
        Err(DynamicsError::ZeroEpoch)
    ));
    assert_eq!(render_history(&storage).unwrap(), before);
}

#[test]
fn test_render_history() {
    let node = TestNode::new();
    let storage = node.open();
    storage.update_storage("txValidVersion", "2", 40).unwrap();

    let text = render_history(&storage).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    let entries = value.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["epoch"], 1);
    assert_eq!(entries[1]["epoch"], 40);
    assert_eq!(entries[1]["parameters"]["txValidVersion"], 2);
    assert!(entries[0]["parameters"].get("txValidVersion").is_none());
}

#[test]
fn test_show_at_epoch_does_not_move_cursor() {
    let node = TestNode::new();
    let storage = node.open();
    storage.update_storage("maxBytes", "777", 10).unwrap();

    let text = render_parameters(&storage.parameters_at(10).unwrap()).unwrap();
    assert!(text.contains("\"maxBytes\": 777"));
    assert_eq!(storage.current_epoch().unwrap(), 1);
    assert_eq!(storage.max_bytes(), 3_000_000);
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let mut cfg = NodeConfig::default();
    cfg.node.log_filter = Some("meridian_dynamics=debug".into());
    cfg.dynamics.bootstrap_current_epoch = Some(9);
    std::fs::write(&path, toml::to_string_pretty(&cfg).unwrap()).unwrap();

    let loaded = NodeConfig::load_or_default(&path).unwrap();
    assert_eq!(loaded.node.log_filter.as_deref(), Some("meridian_dynamics=debug"));
    assert_eq!(loaded.dynamics.bootstrap_current_epoch, Some(9));
}
