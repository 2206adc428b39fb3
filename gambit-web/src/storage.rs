//! `localStorage` and wall clock for the Persistence Bridge.
use gambit_sync::{Clock, SnapshotStorage, StorageError};
use wasm_bindgen::JsValue;
use web_sys::Storage;

use crate::dom;

/// Browser `localStorage` behind [`SnapshotStorage`].
#[derive(Debug, Clone)]
pub struct BrowserStorage {
    inner: Storage,
}

impl BrowserStorage {
    /// # Errors
    ///
    /// Returns an error when `localStorage` is blocked or absent.
    pub fn open() -> Result<Self, JsValue> {
        dom::local_storage().map(|inner| Self { inner })
    }
}

impl SnapshotStorage for BrowserStorage {
    fn read(&self, key: &str) -> Option<String> {
        self.inner.get_item(key).ok().flatten()
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner
            .set_item(key, value)
            .map_err(|err| StorageError::Backend(dom::js_error_message(&err)))
    }

    fn remove(&mut self, key: &str) {
        if let Err(err) = self.inner.remove_item(key) {
            log::warn!(
                target: "gambit::web::storage",
                "could not clear {key}: {}",
                dom::js_error_message(&err)
            );
        }
    }
}

/// `Date.now()` in milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsClock;

impl Clock for JsClock {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn now_millis(&self) -> u64 {
        js_sys::Date::now().max(0.0) as u64
    }
}
