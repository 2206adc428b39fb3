#![cfg(target_arch = "wasm32")]

use gambit_sync::constants::{RECOVERY_FRESHNESS_MS, RECOVERY_STORAGE_KEY};
use gambit_sync::{EconomyConfig, PersistenceBridge, SessionState, Side, SnapshotStorage};
use gambit_web::{BrowserStorage, JsClock};
use wasm_bindgen_test::*;

wasm_bindgen_test::wasm_bindgen_test_configure!(run_in_browser);

fn clean_storage() -> BrowserStorage {
    let mut storage = BrowserStorage::open().expect("localStorage");
    storage.remove(RECOVERY_STORAGE_KEY);
    storage
}

#[wasm_bindgen_test]
fn snapshot_survives_a_second_handle() {
    let storage = clean_storage();
    let mut bridge = PersistenceBridge::new(storage, JsClock);
    let state = SessionState::new("web-room", Side::Black, &EconomyConfig::default());
    assert!(bridge.save(&state, "ada"));

    let mut reopened = PersistenceBridge::new(BrowserStorage::open().expect("localStorage"), JsClock);
    let snapshot = reopened
        .load_if_fresh(RECOVERY_FRESHNESS_MS)
        .expect("fresh snapshot");
    assert_eq!(snapshot.room_id, "web-room");
    assert_eq!(snapshot.local_side, Side::Black);
    reopened.discard();
    assert!(reopened.peek().is_none());
}

#[wasm_bindgen_test]
fn malformed_entry_reads_as_absent() {
    let mut storage = clean_storage();
    storage
        .write(RECOVERY_STORAGE_KEY, "not json")
        .expect("write");
    let mut bridge = PersistenceBridge::new(storage, JsClock);
    assert!(bridge.load_if_fresh(RECOVERY_FRESHNESS_MS).is_none());
    assert!(BrowserStorage::open().expect("localStorage").read(RECOVERY_STORAGE_KEY).is_none());
}
