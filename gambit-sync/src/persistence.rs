//! Persistence Bridge: one recovery snapshot in durable local storage.
//!
//! The host supplies the storage backend (browser `localStorage`, a file, an
//! in-memory map) and the wall clock. Saving never fails loudly and a
//! malformed stored record reads as absent.
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

use crate::constants::{LOG_PERSIST, RECOVERY_STORAGE_KEY};
use crate::state::{Phase, PlotRow, ResourceLedger, SessionState, Side};

/// Minimal record needed to rejoin a room after a reload or disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverySnapshot {
    pub room_id: String,
    pub local_side: Side,
    pub username: String,
    pub encoded_position: String,
    pub plots: BTreeMap<Side, PlotRow>,
    #[serde(default)]
    pub economy: BTreeMap<Side, ResourceLedger>,
    #[serde(default)]
    pub captures: BTreeMap<Side, u32>,
    #[serde(default)]
    pub turn_owner: Option<Side>,
    #[serde(default)]
    pub turn_number: u32,
    #[serde(default)]
    pub phase: Option<Phase>,
    /// Whether the current turn's one farm action is already spent.
    #[serde(default)]
    pub resource_action_used: bool,
    #[serde(default)]
    pub plots_advanced_through: BTreeMap<Side, u32>,
    pub timestamp_millis: u64,
}

impl RecoverySnapshot {
    #[must_use]
    pub fn capture(state: &SessionState, username: &str, timestamp_millis: u64) -> Self {
        Self {
            room_id: state.room_id.clone(),
            local_side: state.local_side,
            username: username.to_string(),
            encoded_position: state.encoded_position.clone(),
            plots: state.plots.clone(),
            economy: state.economy.clone(),
            captures: state.captures.clone(),
            turn_owner: Some(state.turn_owner),
            turn_number: state.turn_number,
            phase: Some(state.phase),
            resource_action_used: state.resource_action_used,
            plots_advanced_through: state.plots_advanced_through.clone(),
            timestamp_millis,
        }
    }

    /// Lay the recorded fields over `base`, which supplies everything else.
    #[must_use]
    pub fn restore_into(&self, mut base: SessionState) -> SessionState {
        base.room_id.clone_from(&self.room_id);
        base.local_side = self.local_side;
        base.encoded_position.clone_from(&self.encoded_position);
        base.plots.clone_from(&self.plots);
        if !self.economy.is_empty() {
            base.economy.clone_from(&self.economy);
        }
        if !self.captures.is_empty() {
            base.captures.clone_from(&self.captures);
        }
        if let Some(owner) = self.turn_owner {
            base.turn_owner = owner;
        }
        if let Some(phase) = self.phase {
            base.phase = phase;
            base.turn_number = self.turn_number;
            base.resource_action_used = self.resource_action_used;
            base.plots_advanced_through.clone_from(&self.plots_advanced_through);
        }
        base
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend refused the write: {0}")]
    Backend(String),
    #[error("snapshot could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// String key/value store in the shape of browser `localStorage`.
pub trait SnapshotStorage {
    fn read(&self, key: &str) -> Option<String>;

    /// Write `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write (quota, privacy mode).
    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&mut self, key: &str);
}

/// Shared in-memory storage; clones see the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl SnapshotStorage for MemoryStorage {
    fn read(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        self.entries.borrow_mut().remove(key);
    }
}

/// Wall-clock source in milliseconds since the Unix epoch.
pub trait Clock {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| {
                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
            })
    }
}

/// Hand-driven clock for replays; clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    #[must_use]
    pub fn starting_at(millis: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(millis)),
        }
    }

    pub fn set(&self, millis: u64) {
        self.now.set(millis);
    }

    pub fn advance(&self, millis: u64) {
        self.now.set(self.now.get().saturating_add(millis));
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.get()
    }
}

/// Reads and writes the single recovery record.
#[derive(Debug)]
pub struct PersistenceBridge<S: SnapshotStorage, C: Clock> {
    storage: S,
    clock: C,
    key: String,
}

impl<S: SnapshotStorage, C: Clock> PersistenceBridge<S, C> {
    pub fn new(storage: S, clock: C) -> Self {
        Self::with_key(storage, clock, RECOVERY_STORAGE_KEY)
    }

    pub fn with_key(storage: S, clock: C, key: &str) -> Self {
        Self {
            storage,
            clock,
            key: key.to_string(),
        }
    }

    #[must_use]
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    #[must_use]
    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Overwrite the record with `state`, stamped now. Returns whether it was stored.
    pub fn save(&mut self, state: &SessionState, username: &str) -> bool {
        let snapshot = RecoverySnapshot::capture(state, username, self.clock.now_millis());
        let written = serde_json::to_string(&snapshot)
            .map_err(StorageError::from)
            .and_then(|json| self.storage.write(&self.key, &json));
        match written {
            Ok(()) => {
                debug!(target: LOG_PERSIST, "saved recovery snapshot for room {}", snapshot.room_id);
                true
            }
            Err(err) => {
                warn!(target: LOG_PERSIST, "recovery snapshot not saved: {err}");
                false
            }
        }
    }

    /// Stored record without any freshness check. Malformed data reads as `None`.
    #[must_use]
    pub fn peek(&self) -> Option<RecoverySnapshot> {
        let raw = self.storage.read(&self.key)?;
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(target: LOG_PERSIST, "ignoring malformed recovery snapshot: {err}");
                None
            }
        }
    }

    /// The record if it is at most `max_age_millis` old. Stale or malformed
    /// records are deleted.
    pub fn load_if_fresh(&mut self, max_age_millis: u64) -> Option<RecoverySnapshot> {
        let Some(snapshot) = self.peek() else {
            if self.storage.read(&self.key).is_some() {
                self.storage.remove(&self.key);
            }
            return None;
        };
        let age = self
            .clock
            .now_millis()
            .saturating_sub(snapshot.timestamp_millis);
        if age <= max_age_millis {
            Some(snapshot)
        } else {
            debug!(target: LOG_PERSIST, "discarding recovery snapshot aged {age}ms");
            self.storage.remove(&self.key);
            None
        }
    }

    pub fn discard(&mut self) {
        self.storage.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EconomyConfig;
    use crate::constants::RECOVERY_FRESHNESS_MS;

    fn bridge() -> (PersistenceBridge<MemoryStorage, ManualClock>, MemoryStorage, ManualClock) {
        let storage = MemoryStorage::new();
        let clock = ManualClock::starting_at(1_000_000);
        (
            PersistenceBridge::new(storage.clone(), clock.clone()),
            storage,
            clock,
        )
    }

    fn state(room: &str) -> SessionState {
        SessionState::new(room, Side::Black, &EconomyConfig::default())
    }

    #[test]
    fn freshness_boundary() {
        let (mut bridge, storage, clock) = bridge();
        assert!(bridge.save(&state("r1"), "ada"));
        clock.advance(4 * 60 * 1000 + 59 * 1000);
        assert!(bridge.load_if_fresh(RECOVERY_FRESHNESS_MS).is_some());
        clock.advance(2 * 1000);
        assert!(bridge.load_if_fresh(RECOVERY_FRESHNESS_MS).is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn save_overwrites_previous_room() {
        let (mut bridge, storage, _clock) = bridge();
        bridge.save(&state("r1"), "ada");
        bridge.save(&state("r2"), "ada");
        assert_eq!(storage.len(), 1);
        assert_eq!(bridge.peek().unwrap().room_id, "r2");
    }

    #[test]
    fn malformed_record_reads_as_absent_and_is_cleared() {
        let (mut bridge, mut storage, _clock) = bridge();
        storage.write(RECOVERY_STORAGE_KEY, "{not json").unwrap();
        assert!(bridge.load_if_fresh(RECOVERY_FRESHNESS_MS).is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn restore_lays_record_over_base() {
        let mut saved = state("r1");
        saved.ledger_mut(Side::Black).balance = 3;
        saved.captures.insert(Side::Black, 2);
        saved.turn_owner = Side::Black;
        let snapshot = RecoverySnapshot::capture(&saved, "ada", 5);
        let restored = snapshot.restore_into(state("other"));
        assert_eq!(restored.room_id, "r1");
        assert_eq!(restored.economy, saved.economy);
        assert_eq!(restored.captures, saved.captures);
        assert_eq!(restored.plots, saved.plots);
        assert_eq!(restored.turn_owner, Side::Black);
    }

    #[test]
    fn restore_keeps_the_spent_farm_action() {
        let mut saved = state("r1");
        saved.turn_owner = Side::Black;
        saved.turn_number = 3;
        saved.phase = Phase::Tactical;
        saved.resource_action_used = true;
        saved.plots_advanced_through.insert(Side::Black, 3);
        let snapshot = RecoverySnapshot::capture(&saved, "ada", 5);
        let restored = snapshot.restore_into(state("r1"));
        assert_eq!(restored.phase, Phase::Tactical);
        assert!(restored.resource_action_used);
        assert_eq!(restored.turn_number, 3);
        assert_eq!(restored.plots_advanced_through, saved.plots_advanced_through);
    }

    #[test]
    fn older_records_without_turn_progress_still_load() {
        let saved = RecoverySnapshot::capture(&state("r1"), "ada", 5);
        let mut value = serde_json::to_value(&saved).unwrap();
        let fields = value.as_object_mut().unwrap();
        for key in ["turnNumber", "phase", "resourceActionUsed", "plotsAdvancedThrough"] {
            fields.remove(key);
        }
        let old: RecoverySnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(old.phase, None);
        let restored = old.restore_into(state("r1"));
        assert_eq!(restored.phase, Phase::Resource);
        assert!(!restored.resource_action_used);
    }

    struct FullStorage;

    impl SnapshotStorage for FullStorage {
        fn read(&self, _key: &str) -> Option<String> {
            None
        }

        fn write(&mut self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Backend("quota exceeded".to_string()))
        }

        fn remove(&mut self, _key: &str) {}
    }

    #[test]
    fn failed_write_is_absorbed() {
        let mut bridge = PersistenceBridge::new(FullStorage, ManualClock::default());
        assert!(!bridge.save(&state("r1"), "ada"));
    }
}
