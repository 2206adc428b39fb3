#![forbid(unsafe_code)]
//! Browser host for the session sync core: `localStorage` persistence, a
//! `Date.now()` clock, a chess.js-compatible board object as the rules
//! oracle, and a WebSocket pump around [`gambit_sync::SessionDriver`].
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

pub mod client;
pub mod dom;
pub mod oracle;
pub mod storage;

pub use client::{ClientError, GambitClient};
pub use oracle::{JsBoard, JsOracle};
pub use storage::{BrowserStorage, JsClock};

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn start() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
    dom::init_console_logging(log::LevelFilter::Info);
}
