//! Timeline behaviour through the public `Storage` API, on the in-memory store.

use std::collections::BTreeSet;
use std::sync::Arc;

use meridian_dynamics::{
    create_timeline, node_key, Database, DynamicsError, KeyValueStore, MemoryStore, ParameterReader,
    ParameterSet, Storage,
};
use proptest::prelude::*;

fn started(store: Arc<MemoryStore>) -> Storage {
    let storage = Storage::new();
    storage.init(store).unwrap();
    storage.start().unwrap();
    storage
}

/// Bootstrapped store with a change point at every epoch in `epochs`, applied
/// in the given order.
fn with_change_points(epochs: &[u32]) -> (Arc<MemoryStore>, Storage) {
    let store = Arc::new(MemoryStore::new());
    let storage = started(store.clone());
    for &epoch in epochs {
        storage
            .update_storage("atomicSwapValidStopEpoch", &epoch.to_string(), epoch)
            .unwrap();
    }
    (store, storage)
}

fn seeded_at(epoch: u32) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let db = Database::new(store.clone());
    let (node, timeline) = create_timeline(epoch, &ParameterSet::standard()).unwrap();
    db.set_node(&node).unwrap();
    db.set_timeline(&timeline).unwrap();
    store
}

#[test]
fn test_history_is_ordered_and_linked() {
    let (store, storage) = with_change_points(&[40, 10, 70, 20]);
    let history = storage.history().unwrap();
    let epochs: Vec<u32> = history.iter().map(|(e, _)| *e).collect();
    assert_eq!(epochs, vec![1, 10, 20, 40, 70]);

    let db = Database::new(store);
    let nodes: Vec<_> = epochs.iter().map(|&e| db.get_node(e).unwrap()).collect();
    for pair in nodes.windows(2) {
        assert_eq!(pair[0].next_epoch(), pair[1].epoch());
        assert_eq!(pair[1].prev_epoch(), pair[0].epoch());
    }
    assert!(nodes[0].is_tail() && !nodes[0].is_head());
    assert!(nodes[4].is_head() && !nodes[4].is_tail());
    assert_eq!(db.get_timeline().unwrap().epoch_last_updated(), 70);
}

#[test]
fn test_repeat_update_creates_no_duplicate() {
    let (store, storage) = with_change_points(&[10, 20]);
    let records = store.len();

    storage.update_storage("maxBytes", "7", 10).unwrap();
    storage.update_storage("maxBytes", "8", 20).unwrap();
    storage.update_storage("maxBytes", "9", 1).unwrap();

    assert_eq!(store.len(), records);
    let epochs: Vec<u32> = storage.history().unwrap().into_iter().map(|(e, _)| e).collect();
    assert_eq!(epochs, vec![1, 10, 20]);
    storage.load_storage(20).unwrap();
    assert_eq!(storage.max_bytes(), 9);
}

#[test]
fn test_fee_update_survives_reload() {
    let store = Arc::new(MemoryStore::new());
    let storage = started(store.clone());
    storage
        .update_storage("minTxBurnedFee", "1000000000000000000000", 5)
        .unwrap();
    drop(storage);

    let storage = started(store);
    storage.load_storage(5).unwrap();
    assert_eq!(storage.min_tx_burned_fee().to_string(), "1000000000000000000000");
    storage.load_storage(4).unwrap();
    assert_eq!(storage.min_tx_burned_fee().to_string(), "0");
}

#[test]
fn test_corrupt_node_surfaces() {
    let (store, storage) = with_change_points(&[10]);
    store.set(&node_key(10).unwrap(), b"garbage").unwrap();
    assert!(storage.load_storage(50).is_err());
    assert!(storage.history().is_err());
}

#[test]
fn test_missing_node_is_not_present() {
    let (store, storage) = with_change_points(&[10]);
    assert!(store.delete(&node_key(1).unwrap()).unwrap());
    let err = storage.load_storage(5).unwrap_err();
    assert!(err.is_not_present());
}

proptest! {
    #[test]
    fn proptest_lookup_finds_greatest_change_point_not_after(
        order in prop::collection::vec(2u32..400, 0..12),
        query in 1u32..500,
    ) {
        let (_store, storage) = with_change_points(&order);
        let mut points: BTreeSet<u32> = order.iter().copied().collect();
        points.insert(1);

        let history = storage.history().unwrap();
        let epochs: Vec<u32> = history.iter().map(|(e, _)| *e).collect();
        prop_assert_eq!(&epochs, &points.iter().copied().collect::<Vec<_>>());

        let expected = points.range(..=query).next_back().copied().unwrap();
        let (_, snapshot) = history.iter().find(|(e, _)| *e == expected).unwrap();
        prop_assert_eq!(&storage.parameters_at(query).unwrap(), snapshot);
    }

    #[test]
    fn proptest_lookup_before_tail_fails(tail in 2u32..1000, offset in 1u32..1000) {
        let storage = started(seeded_at(tail));
        let query = tail.saturating_sub(offset).max(1);
        prop_assume!(query < tail);
        let err = storage.parameters_at(query).unwrap_err();
        let is_predates = matches!(err, DynamicsError::EpochPredatesHistory { .. });
        prop_assert!(is_predates);
        prop_assert!(storage.parameters_at(tail + offset).is_ok());
    }

    #[test]
    fn proptest_update_propagates_forward_only(
        order in prop::collection::vec(2u32..200, 0..8),
        at in 1u32..250,
        value in 1u32..1_000_000,
    ) {
        let (store, storage) = with_change_points(&order);
        let before: Vec<(u32, Vec<u8>)> = storage
            .history()
            .unwrap()
            .into_iter()
            .filter(|(e, _)| *e < at)
            .map(|(e, _)| (e, store.get(&node_key(e).unwrap()).unwrap().unwrap()))
            .collect();

        storage.update_storage("maxBytes", &value.to_string(), at).unwrap();

        for (epoch, snapshot) in storage.history().unwrap() {
            if epoch >= at {
                prop_assert_eq!(snapshot.max_bytes(), value);
                prop_assert_eq!(snapshot.max_proposal_size(), value);
            }
        }
        let db = Database::new(store.clone());
        for (epoch, bytes) in before {
            let now = store.get(&node_key(epoch).unwrap()).unwrap().unwrap();
            // Only the forward link of the immediate predecessor may change.
            prop_assert_eq!(&now[..8], &bytes[..8]);
            prop_assert_eq!(&now[12..], &bytes[12..]);
            prop_assert_eq!(
                db.get_node(epoch).unwrap().snapshot().max_bytes(),
                ParameterSet::standard().max_bytes()
            );
        }
    }

    #[test]
    fn proptest_head_and_tail_coincide_only_for_singleton(
        order in prop::collection::vec(2u32..100, 0..6),
    ) {
        let (store, storage) = with_change_points(&order);
        let db = Database::new(store);
        let nodes: Vec<_> = storage
            .history()
            .unwrap()
            .into_iter()
            .map(|(e, _)| db.get_node(e).unwrap())
            .collect();
        let heads = nodes.iter().filter(|n| n.is_head()).count();
        let tails = nodes.iter().filter(|n| n.is_tail()).count();
        prop_assert_eq!(heads, 1);
        prop_assert_eq!(tails, 1);
        let both = nodes.iter().any(|n| n.is_head() && n.is_tail());
        prop_assert_eq!(both, nodes.len() == 1);
    }
}
