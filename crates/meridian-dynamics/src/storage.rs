//! Storage coordinator -- the facade the rest of the node talks to.
//!
//! `Storage` owns the database handle and one cached "active" parameter set.
//! Reads are answered from the cache; `load_storage` and `advance_to` move the
//! cache to another epoch; `update_storage` records a governance change.
//!
//! Lifecycle: `init` (Uninitialized -> Initializing), then `start`
//! (Initializing -> Ready). Every other public operation blocks until `start`
//! has been called.
//!
//! One `RwLock` guards the coordinator state and serializes the sequence of
//! gateway calls making up each logical operation. Mutations stage their
//! records in a changeset and commit them in one batch.

use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use num_bigint::BigUint;
use tracing::{debug, info, warn};

use crate::database::{Changeset, Database, KeyValueStore};
use crate::error::{DynamicsError, Result};
use crate::node::Node;
use crate::params::ParameterSet;
use crate::timeline::{create_timeline, Timeline};

/// First epoch of a freshly bootstrapped timeline.
pub const GENESIS_EPOCH: u32 = 1;

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    /// Timeline loaded, waiting for `start`.
    Initializing,
    Ready,
}

/// Read-only view of the active parameters.
///
/// Consensus code depends on this rather than on `Storage` so it can be fed a
/// fixed set in tests.
pub trait ParameterReader: Send + Sync {
    fn max_bytes(&self) -> u32;
    fn max_proposal_size(&self) -> u32;
    fn proposal_step_timeout(&self) -> Duration;
    fn pre_vote_step_timeout(&self) -> Duration;
    fn pre_commit_step_timeout(&self) -> Duration;
    fn dead_block_round_next_round_timeout(&self) -> Duration;
    fn download_timeout(&self) -> Duration;
    fn srvr_msg_timeout(&self) -> Duration;
    fn msg_timeout(&self) -> Duration;
    fn min_tx_burned_fee(&self) -> BigUint;
    fn tx_valid_version(&self) -> u32;
    fn min_value_store_burned_fee(&self) -> BigUint;
    fn value_store_tx_valid_version(&self) -> u32;
    fn min_atomic_swap_burned_fee(&self) -> BigUint;
    fn atomic_swap_valid_stop_epoch(&self) -> u32;
    fn data_store_tx_valid_version(&self) -> u32;
}

impl ParameterReader for ParameterSet {
    fn max_bytes(&self) -> u32 {
        ParameterSet::max_bytes(self)
    }
    fn max_proposal_size(&self) -> u32 {
        ParameterSet::max_proposal_size(self)
    }
    fn proposal_step_timeout(&self) -> Duration {
        ParameterSet::proposal_step_timeout(self)
    }
    fn pre_vote_step_timeout(&self) -> Duration {
        ParameterSet::pre_vote_step_timeout(self)
    }
    fn pre_commit_step_timeout(&self) -> Duration {
        ParameterSet::pre_commit_step_timeout(self)
    }
    fn dead_block_round_next_round_timeout(&self) -> Duration {
        ParameterSet::dead_block_round_next_round_timeout(self)
    }
    fn download_timeout(&self) -> Duration {
        ParameterSet::download_timeout(self)
    }
    fn srvr_msg_timeout(&self) -> Duration {
        ParameterSet::srvr_msg_timeout(self)
    }
    fn msg_timeout(&self) -> Duration {
        ParameterSet::msg_timeout(self)
    }
    fn min_tx_burned_fee(&self) -> BigUint {
        ParameterSet::min_tx_burned_fee(self).clone()
    }
    fn tx_valid_version(&self) -> u32 {
        ParameterSet::tx_valid_version(self)
    }
    fn min_value_store_burned_fee(&self) -> BigUint {
        ParameterSet::min_value_store_burned_fee(self).clone()
    }
    fn value_store_tx_valid_version(&self) -> u32 {
        ParameterSet::value_store_tx_valid_version(self)
    }
    fn min_atomic_swap_burned_fee(&self) -> BigUint {
        ParameterSet::min_atomic_swap_burned_fee(self).clone()
    }
    fn atomic_swap_valid_stop_epoch(&self) -> u32 {
        ParameterSet::atomic_swap_valid_stop_epoch(self)
    }
    fn data_store_tx_valid_version(&self) -> u32 {
        ParameterSet::data_store_tx_valid_version(self)
    }
}

/// One-shot barrier released by `Storage::start`.
#[derive(Debug, Default)]
struct StartGate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl StartGate {
    fn open(&self) -> Result<()> {
        let mut open = self.open.lock().map_err(|_| DynamicsError::LockPoisoned)?;
        if *open {
            return Err(DynamicsError::AlreadyStarted);
        }
        *open = true;
        self.cond.notify_all();
        Ok(())
    }

    fn wait(&self) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        while !*open {
            open = self.cond.wait(open).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[derive(Debug)]
struct State {
    phase: Phase,
    database: Option<Database>,
    params: ParameterSet,
}

impl State {
    fn database(&self) -> Result<&Database> {
        self.database.as_ref().ok_or(DynamicsError::NotInitialized)
    }
}

#[derive(Debug)]
pub struct Storage {
    state: RwLock<State>,
    gate: StartGate,
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                phase: Phase::Uninitialized,
                database: None,
                params: ParameterSet::default(),
            }),
            gate: StartGate::default(),
        }
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| DynamicsError::LockPoisoned)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| DynamicsError::LockPoisoned)
    }

    pub fn phase(&self) -> Phase {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .phase
    }

    /// Attach a backend and load the timeline.
    ///
    /// An empty backend is bootstrapped with a single node at epoch 1 holding
    /// the standard parameters. Otherwise the descriptor's head is verified
    /// and the cache is positioned at the stored cursor. A descriptor that
    /// does not point at a head node is fatal; nothing is repaired.
    pub fn init(&self, store: Arc<dyn KeyValueStore>) -> Result<()> {
        let mut state = self.write_state()?;
        if state.phase != Phase::Uninitialized {
            return Err(DynamicsError::AlreadyInitialized);
        }

        let database = Database::new(store);
        let params = match database.try_get_timeline()? {
            None => {
                let (node, timeline) = create_timeline(GENESIS_EPOCH, &ParameterSet::standard())?;
                let params = node.snapshot().copy()?;
                let mut cs = Changeset::new(&database);
                cs.put_node(node);
                cs.put_timeline(timeline);
                cs.commit()?;
                info!(epoch = GENESIS_EPOCH, "dynamics: bootstrapped empty timeline");
                params
            }
            Some(timeline) => {
                let head = database.get_node(timeline.epoch_last_updated())?;
                if !head.is_head() {
                    warn!(
                        epoch = head.epoch(),
                        "dynamics: descriptor does not point at the head node"
                    );
                    return Err(DynamicsError::InvalidNode {
                        epoch: head.epoch(),
                        reason: "descriptor points at a node that is not the head",
                    });
                }
                let node = find_node(&database, timeline.current_epoch())?;
                info!(
                    head = timeline.epoch_last_updated(),
                    current_epoch = timeline.current_epoch(),
                    "dynamics: loaded timeline"
                );
                node.snapshot().copy()?
            }
        };

        state.database = Some(database);
        state.params = params;
        state.phase = Phase::Initializing;
        Ok(())
    }

    /// Release every caller blocked on the start barrier. Valid exactly once,
    /// and only after `init`.
    pub fn start(&self) -> Result<()> {
        let mut state = self.write_state()?;
        match state.phase {
            Phase::Uninitialized => return Err(DynamicsError::NotInitialized),
            Phase::Ready => return Err(DynamicsError::AlreadyStarted),
            Phase::Initializing => {}
        }
        self.gate.open()?;
        state.phase = Phase::Ready;
        info!("dynamics: storage started");
        Ok(())
    }

    /// Validate an update without touching any state.
    pub fn check_update(field: &str, value: &str, epoch: u32) -> Result<()> {
        if epoch == 0 {
            return Err(DynamicsError::ZeroEpoch);
        }
        ParameterSet::check_update_value(field, value)
    }

    /// Point the cache at the parameters in force for `epoch`.
    pub fn load_storage(&self, epoch: u32) -> Result<()> {
        self.gate.wait();
        let mut state = self.write_state()?;
        let node = find_node(state.database()?, epoch)?;
        state.params = node.snapshot().copy()?;
        debug!(epoch, change_point = node.epoch(), "dynamics: loaded parameters");
        Ok(())
    }

    /// Enact `field = value` from `epoch` onward.
    ///
    /// Nodes before `epoch` are left untouched. The node at `epoch` is created
    /// if needed, and the change is carried forward through every later node
    /// up to the head. The cache is then refreshed at the cursor so a change
    /// covering the current epoch is visible immediately.
    pub fn update_storage(&self, field: &str, value: &str, epoch: u32) -> Result<()> {
        if let Err(err) = Self::check_update(field, value, epoch) {
            warn!(field, value, epoch, error = %err, "dynamics: rejected update");
            return Err(err);
        }
        self.gate.wait();
        let mut state = self.write_state()?;
        let database = state.database()?.clone();

        let mut cs = Changeset::new(&database);
        update_storage_value(&mut cs, field, value, epoch)?;
        let touched: Vec<u32> = cs.staged_epochs().collect();
        cs.commit()?;
        info!(field, value, epoch, nodes = ?touched, "dynamics: committed update");

        // The batch is durable from here on; a cursor the walk cannot place
        // leaves the cache as it was rather than failing the update.
        let cursor = database.get_timeline()?.current_epoch();
        match find_node(&database, cursor) {
            Ok(node) => state.params = node.snapshot().copy()?,
            Err(DynamicsError::EpochPredatesHistory { tail, .. }) => {
                warn!(cursor, tail, "dynamics: cursor predates history, cache kept");
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    pub fn current_epoch(&self) -> Result<u32> {
        self.gate.wait();
        let state = self.read_state()?;
        Ok(state.database()?.get_timeline()?.current_epoch())
    }

    /// Move the cursor. The cache is not repositioned; see `advance_to`.
    ///
    /// A cursor before the tail is rejected with `EpochPredatesHistory`.
    pub fn set_current_epoch(&self, epoch: u32) -> Result<()> {
        if epoch == 0 {
            return Err(DynamicsError::ZeroEpoch);
        }
        self.gate.wait();
        let state = self.write_state()?;
        let database = state.database()?;
        find_node(database, epoch)?;
        let mut timeline = database.get_timeline()?;
        timeline.set_current_epoch(epoch)?;
        database.set_timeline(&timeline)?;
        debug!(epoch, "dynamics: set current epoch");
        Ok(())
    }

    /// Epoch boundary: move the cursor to `epoch` and load its parameters
    /// under one exclusive lock.
    pub fn advance_to(&self, epoch: u32) -> Result<()> {
        if epoch == 0 {
            return Err(DynamicsError::ZeroEpoch);
        }
        self.gate.wait();
        let mut state = self.write_state()?;
        let database = state.database()?.clone();
        let node = find_node(&database, epoch)?;
        let params = node.snapshot().copy()?;

        let mut timeline = database.get_timeline()?;
        let previous = timeline.current_epoch();
        timeline.set_current_epoch(epoch)?;
        database.set_timeline(&timeline)?;
        state.params = params;
        info!(from = previous, to = epoch, "dynamics: advanced epoch");
        Ok(())
    }

    /// Copy of the cached active parameter set.
    pub fn parameters(&self) -> ParameterSet {
        self.gate.wait();
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .params
            .clone()
    }

    /// Parameters in force at `epoch`, without moving the cache.
    pub fn parameters_at(&self, epoch: u32) -> Result<ParameterSet> {
        self.gate.wait();
        let state = self.read_state()?;
        find_node(state.database()?, epoch)?.snapshot().copy()
    }

    /// Every change point from tail to head.
    pub fn history(&self) -> Result<Vec<(u32, ParameterSet)>> {
        self.gate.wait();
        let state = self.read_state()?;
        let database = state.database()?;
        let timeline = database.get_timeline()?;

        let mut out = Vec::new();
        let mut node = database.get_node(timeline.epoch_last_updated())?;
        loop {
            let prev = node.prev_epoch();
            let is_tail = node.is_tail();
            let epoch = node.epoch();
            out.push((epoch, node.snapshot().clone()));
            if is_tail {
                break;
            }
            node = step_back(database, epoch, prev)?;
        }
        out.reverse();
        Ok(out)
    }

    fn read_params<T>(&self, f: impl FnOnce(&ParameterSet) -> T) -> T {
        self.gate.wait();
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state.params)
    }
}

impl ParameterReader for Storage {
    fn max_bytes(&self) -> u32 {
        self.read_params(ParameterSet::max_bytes)
    }
    fn max_proposal_size(&self) -> u32 {
        self.read_params(ParameterSet::max_proposal_size)
    }
    fn proposal_step_timeout(&self) -> Duration {
        self.read_params(ParameterSet::proposal_step_timeout)
    }
    fn pre_vote_step_timeout(&self) -> Duration {
        self.read_params(ParameterSet::pre_vote_step_timeout)
    }
    fn pre_commit_step_timeout(&self) -> Duration {
        self.read_params(ParameterSet::pre_commit_step_timeout)
    }
    fn dead_block_round_next_round_timeout(&self) -> Duration {
        self.read_params(ParameterSet::dead_block_round_next_round_timeout)
    }
    fn download_timeout(&self) -> Duration {
        self.read_params(ParameterSet::download_timeout)
    }
    fn srvr_msg_timeout(&self) -> Duration {
        self.read_params(ParameterSet::srvr_msg_timeout)
    }
    fn msg_timeout(&self) -> Duration {
        self.read_params(ParameterSet::msg_timeout)
    }
    fn min_tx_burned_fee(&self) -> BigUint {
        self.read_params(|p| p.min_tx_burned_fee().clone())
    }
    fn tx_valid_version(&self) -> u32 {
        self.read_params(ParameterSet::tx_valid_version)
    }
    fn min_value_store_burned_fee(&self) -> BigUint {
        self.read_params(|p| p.min_value_store_burned_fee().clone())
    }
    fn value_store_tx_valid_version(&self) -> u32 {
        self.read_params(ParameterSet::value_store_tx_valid_version)
    }
    fn min_atomic_swap_burned_fee(&self) -> BigUint {
        self.read_params(|p| p.min_atomic_swap_burned_fee().clone())
    }
    fn atomic_swap_valid_stop_epoch(&self) -> u32 {
        self.read_params(ParameterSet::atomic_swap_valid_stop_epoch)
    }
    fn data_store_tx_valid_version(&self) -> u32 {
        self.read_params(ParameterSet::data_store_tx_valid_version)
    }
}

// -- Timeline walks --

/// Anything the walks can read nodes and the descriptor from.
trait NodeSource {
    fn node(&self, epoch: u32) -> Result<Node>;
    fn timeline(&self) -> Result<Timeline>;
}

impl NodeSource for Database {
    fn node(&self, epoch: u32) -> Result<Node> {
        self.get_node(epoch)
    }
    fn timeline(&self) -> Result<Timeline> {
        self.get_timeline()
    }
}

impl NodeSource for Changeset<'_> {
    fn node(&self, epoch: u32) -> Result<Node> {
        Changeset::node(self, epoch)
    }
    fn timeline(&self) -> Result<Timeline> {
        Changeset::timeline(self)
    }
}

/// Load the predecessor of `from` and check it links back.
fn step_back<S: NodeSource>(src: &S, from: u32, prev: u32) -> Result<Node> {
    let node = src.node(prev)?;
    if node.next_epoch() != from {
        return Err(DynamicsError::Corrupt(format!(
            "node {prev} links forward to {} instead of {from}",
            node.next_epoch()
        )));
    }
    Ok(node)
}

fn head<S: NodeSource>(src: &S) -> Result<(Timeline, Node)> {
    let timeline = src.timeline()?;
    let head = src.node(timeline.epoch_last_updated())?;
    if !head.is_head() {
        return Err(DynamicsError::InvalidNode {
            epoch: head.epoch(),
            reason: "descriptor points at a node that is not the head",
        });
    }
    Ok((timeline, head))
}

/// The node whose epoch is the greatest one not after `epoch`.
fn find_node<S: NodeSource>(src: &S, epoch: u32) -> Result<Node> {
    if epoch == 0 {
        return Err(DynamicsError::ZeroEpoch);
    }
    let (_, mut node) = head(src)?;
    loop {
        if epoch >= node.epoch() {
            return Ok(node);
        }
        if node.is_tail() {
            return Err(DynamicsError::EpochPredatesHistory {
                epoch,
                tail: node.epoch(),
            });
        }
        node = step_back(src, node.epoch(), node.prev_epoch())?;
    }
}

/// Like `find_node`, but falls back to the tail when `epoch` predates it.
fn find_node_or_tail<S: NodeSource>(src: &S, epoch: u32) -> Result<Node> {
    let (_, mut node) = head(src)?;
    while epoch < node.epoch() && !node.is_tail() {
        node = step_back(src, node.epoch(), node.prev_epoch())?;
    }
    Ok(node)
}

/// Weave a pre-linked node into the timeline. Returns `true` when it became
/// the new head.
fn add_node(cs: &mut Changeset<'_>, mut node: Node) -> Result<bool> {
    if !node.is_pre_linked() {
        return Err(DynamicsError::InvalidNode {
            epoch: node.epoch(),
            reason: "only pre-linked nodes can be added",
        });
    }
    let epoch = node.epoch();
    let (mut timeline, mut current) = head(&*cs)?;

    if epoch > current.epoch() {
        node.set_epochs(Some(&mut current), None)?;
        timeline.set_epoch_last_updated(epoch)?;
        debug!(epoch, prev = current.epoch(), "dynamics: linked new head");
        cs.put_node(current);
        cs.put_node(node);
        cs.put_timeline(timeline);
        return Ok(true);
    }

    loop {
        if epoch == current.epoch() {
            return Err(DynamicsError::DuplicateEpoch { epoch });
        }
        if current.is_tail() {
            node.set_epochs(None, Some(&mut current))?;
            debug!(epoch, next = current.epoch(), "dynamics: linked new tail");
            cs.put_node(current);
            cs.put_node(node);
            return Ok(false);
        }
        let mut prev = step_back(&*cs, current.epoch(), current.prev_epoch())?;
        if prev.epoch() < epoch {
            node.set_epochs(Some(&mut prev), Some(&mut current))?;
            debug!(
                epoch,
                prev = prev.epoch(),
                next = current.epoch(),
                "dynamics: spliced node"
            );
            cs.put_node(prev);
            cs.put_node(current);
            cs.put_node(node);
            return Ok(false);
        }
        current = prev;
    }
}

/// Stage the change `field = value` effective from `epoch`.
fn update_storage_value(cs: &mut Changeset<'_>, field: &str, value: &str, epoch: u32) -> Result<()> {
    if epoch == 0 {
        return Err(DynamicsError::ZeroEpoch);
    }
    let anchor = find_node_or_tail(&*cs, epoch)?;

    let forward_from = if anchor.epoch() == epoch {
        let mut node = anchor;
        node.snapshot_mut().update_value(field, value)?;
        let next = (!node.is_head()).then(|| node.next_epoch());
        cs.put_node(node);
        next
    } else {
        let mut snapshot = anchor.snapshot().copy()?;
        snapshot.update_value(field, value)?;
        let node = Node::pre_linked(epoch, snapshot)?;
        if add_node(cs, node)? {
            None
        } else {
            Some(cs.node(epoch)?.next_epoch())
        }
    };

    let Some(mut next) = forward_from else {
        return Ok(());
    };
    loop {
        let mut node = cs.node(next)?;
        node.snapshot_mut().update_value(field, value)?;
        let is_head = node.is_head();
        next = node.next_epoch();
        cs.put_node(node);
        if is_head {
            return Ok(());
        }
    }
}
