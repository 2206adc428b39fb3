//! WebSocket pump around the session driver.
//!
//! One interval timer drives [`SessionDriver::tick`]; socket events feed the
//! driver and every callback flushes the outbox while the socket is open.
use gambit_sync::{
    ConfigStore, DriverConfig, PersistenceBridge, Rejection, ResourceAction, SessionDriver,
    Square,
};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use thiserror::Error;
use wasm_bindgen::JsCast;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;
use web_sys::{CloseEvent, Event, MessageEvent, WebSocket};

use crate::dom;
use crate::oracle::{JsBoard, JsOracle};
use crate::storage::{BrowserStorage, JsClock};

const TICK_INTERVAL_MS: i32 = 250;
const LOG_TARGET: &str = "gambit::web";

type Driver = SessionDriver<JsOracle, BrowserStorage, JsClock>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("browser API unavailable: {0}")]
    Browser(String),
    #[error("invalid driver config: {0}")]
    Config(#[from] gambit_sync::ConfigError),
    #[error("invalid square '{0}'")]
    Square(String),
    #[error(transparent)]
    Rejected(#[from] Rejection),
}

impl From<ClientError> for JsValue {
    fn from(err: ClientError) -> Self {
        Self::from_str(&err.to_string())
    }
}

fn browser(err: &JsValue) -> ClientError {
    ClientError::Browser(dom::js_error_message(err))
}

struct SocketHandlers {
    _open: Closure<dyn FnMut(Event)>,
    _message: Closure<dyn FnMut(MessageEvent)>,
    _close: Closure<dyn FnMut(CloseEvent)>,
}

struct Shared {
    driver: Driver,
    url: String,
    socket: Option<WebSocket>,
    handlers: Option<SocketHandlers>,
    ticker: Option<(i32, Closure<dyn FnMut()>)>,
    on_change: Option<js_sys::Function>,
}

/// Session client exported to the page.
#[wasm_bindgen]
pub struct GambitClient {
    shared: Rc<RefCell<Shared>>,
}

#[wasm_bindgen]
impl GambitClient {
    /// # Errors
    ///
    /// Fails when `localStorage` is unavailable or `driver_config` is invalid.
    #[wasm_bindgen(constructor)]
    pub fn new(
        url: String,
        username: String,
        board: JsBoard,
        driver_config: Option<String>,
    ) -> Result<Self, JsValue> {
        let storage = BrowserStorage::open().map_err(|err| browser(&err))?;
        let config = match driver_config {
            Some(json) => DriverConfig::from_json(&json).map_err(ClientError::from)?,
            None => DriverConfig::default(),
        };
        let driver = SessionDriver::new(
            JsOracle::new(board),
            PersistenceBridge::new(storage, JsClock),
            ConfigStore::default(),
            config,
            username,
        );
        Ok(Self {
            shared: Rc::new(RefCell::new(Shared {
                driver,
                url,
                socket: None,
                handlers: None,
                ticker: None,
                on_change: None,
            })),
        })
    }

    /// Register `callback(stateJson)`, invoked after every state change.
    #[wasm_bindgen(js_name = onChange)]
    pub fn on_change(&self, callback: js_sys::Function) {
        self.shared.borrow_mut().on_change = Some(callback);
    }

    /// Join (or rejoin from a fresh recovery record) and start the timers.
    ///
    /// Returns whether a recovery record was restored.
    ///
    /// # Errors
    ///
    /// Fails when the socket or the interval timer cannot be created.
    pub fn connect(&self) -> Result<bool, JsValue> {
        let restored = self.shared.borrow_mut().driver.connect();
        open_socket(&self.shared)?;
        start_ticker(&self.shared)?;
        notify(&self.shared);
        Ok(restored)
    }

    /// # Errors
    ///
    /// Returns the rejection message when the move is refused.
    #[wasm_bindgen(js_name = playMove)]
    pub fn play_move(&self, from: &str, to: &str) -> Result<(), JsValue> {
        let from = Square::parse(from).ok_or_else(|| ClientError::Square(from.to_string()))?;
        let to = Square::parse(to).ok_or_else(|| ClientError::Square(to.to_string()))?;
        self.shared
            .borrow_mut()
            .driver
            .play_move(from, to)
            .map_err(ClientError::from)?;
        self.after_action();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns the rejection message when planting is refused.
    pub fn plant(&self, plot_index: usize, crop: String) -> Result<(), JsValue> {
        self.resource(&ResourceAction::Plant { crop }, plot_index)
    }

    /// # Errors
    ///
    /// Returns the rejection message when harvesting is refused.
    pub fn harvest(&self, plot_index: usize) -> Result<(), JsValue> {
        self.resource(&ResourceAction::Harvest, plot_index)
    }

    /// # Errors
    ///
    /// Returns the rejection message when unlocking is refused.
    pub fn unlock(&self, plot_index: usize) -> Result<(), JsValue> {
        self.resource(&ResourceAction::Unlock, plot_index)
    }

    /// # Errors
    ///
    /// Returns the rejection message outside the local resource phase.
    #[wasm_bindgen(js_name = skipFarming)]
    pub fn skip_farming(&self) -> Result<(), JsValue> {
        self.shared
            .borrow_mut()
            .driver
            .end_resource_phase()
            .map_err(ClientError::from)?;
        self.after_action();
        Ok(())
    }

    /// # Errors
    ///
    /// Fails when a new socket cannot be created.
    pub fn retry(&self) -> Result<(), JsValue> {
        let reopen = self.shared.borrow_mut().driver.retry();
        if reopen {
            open_socket(&self.shared)?;
        }
        notify(&self.shared);
        Ok(())
    }

    #[wasm_bindgen(js_name = cancelReconnect)]
    pub fn cancel_reconnect(&self) {
        self.shared.borrow_mut().driver.cancel_reconnect();
        notify(&self.shared);
    }

    #[must_use]
    pub fn status(&self) -> String {
        self.shared.borrow().driver.status().label().to_string()
    }

    /// # Errors
    ///
    /// Fails if the state cannot be serialized.
    #[wasm_bindgen(js_name = stateJson)]
    pub fn state_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(self.shared.borrow().driver.state())
            .map_err(|err| JsValue::from_str(&err.to_string()))
    }

    fn resource(&self, action: &ResourceAction, plot_index: usize) -> Result<(), JsValue> {
        self.shared
            .borrow_mut()
            .driver
            .resource_action(action, plot_index)
            .map_err(ClientError::from)?;
        self.after_action();
        Ok(())
    }

    fn after_action(&self) {
        flush(&self.shared);
        notify(&self.shared);
    }
}

impl Drop for GambitClient {
    fn drop(&mut self) {
        let mut shared = self.shared.borrow_mut();
        if let Some((id, _)) = shared.ticker.take()
            && let Some(win) = dom::window()
        {
            win.clear_interval_with_handle(id);
        }
        if let Some(socket) = shared.socket.take() {
            let _ = socket.close();
        }
    }
}

fn open_socket(shared: &Rc<RefCell<Shared>>) -> Result<(), ClientError> {
    let url = shared.borrow().url.clone();
    let socket = WebSocket::new(&url).map_err(|err| browser(&err))?;

    let weak = Rc::downgrade(shared);
    let open = Closure::<dyn FnMut(Event)>::new(move |_event: Event| {
        with_shared(&weak, |shared| {
            flush(shared);
            notify(shared);
        });
    });

    let weak = Rc::downgrade(shared);
    let message = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
        let Some(text) = event.data().as_string() else {
            log::warn!(target: LOG_TARGET, "ignoring non-text frame");
            return;
        };
        with_shared(&weak, |shared| {
            let handled = shared.borrow_mut().driver.handle_frame(&text);
            if let Err(err) = handled {
                log::warn!(target: LOG_TARGET, "dropping unreadable frame: {err}");
            }
            flush(shared);
            notify(shared);
        });
    });

    let weak = Rc::downgrade(shared);
    let close = Closure::<dyn FnMut(CloseEvent)>::new(move |event: CloseEvent| {
        log::info!(target: LOG_TARGET, "socket closed ({})", event.code());
        with_shared(&weak, |shared| {
            {
                let mut inner = shared.borrow_mut();
                inner.socket = None;
                inner.driver.handle_disconnect();
            }
            notify(shared);
        });
    });

    socket.set_onopen(Some(open.as_ref().unchecked_ref()));
    socket.set_onmessage(Some(message.as_ref().unchecked_ref()));
    socket.set_onclose(Some(close.as_ref().unchecked_ref()));

    let mut inner = shared.borrow_mut();
    if let Some(previous) = inner.socket.replace(socket) {
        previous.set_onclose(None);
        let _ = previous.close();
    }
    inner.handlers = Some(SocketHandlers {
        _open: open,
        _message: message,
        _close: close,
    });
    Ok(())
}

fn start_ticker(shared: &Rc<RefCell<Shared>>) -> Result<(), ClientError> {
    if shared.borrow().ticker.is_some() {
        return Ok(());
    }
    let win = dom::window().ok_or_else(|| ClientError::Browser("window unavailable".into()))?;
    let weak = Rc::downgrade(shared);
    let tick = Closure::<dyn FnMut()>::new(move || {
        with_shared(&weak, |shared| {
            let reopen = shared.borrow_mut().driver.tick();
            if reopen && let Err(err) = open_socket(shared) {
                log::warn!(target: LOG_TARGET, "reconnect failed to start: {err}");
                shared.borrow_mut().driver.handle_disconnect();
            }
            flush(shared);
            notify(shared);
        });
    });
    let id = win
        .set_interval_with_callback_and_timeout_and_arguments_0(
            tick.as_ref().unchecked_ref(),
            TICK_INTERVAL_MS,
        )
        .map_err(|err| browser(&err))?;
    shared.borrow_mut().ticker = Some((id, tick));
    Ok(())
}

fn with_shared(weak: &Weak<RefCell<Shared>>, f: impl FnOnce(&Rc<RefCell<Shared>>)) {
    if let Some(shared) = weak.upgrade() {
        f(&shared);
    }
}

/// Send queued messages if the socket is open; otherwise they wait.
fn flush(shared: &Rc<RefCell<Shared>>) {
    let mut inner = shared.borrow_mut();
    let Some(socket) = inner.socket.clone() else {
        return;
    };
    if socket.ready_state() != WebSocket::OPEN {
        return;
    }
    for msg in inner.driver.drain_outbound() {
        let sent = msg
            .to_json()
            .map_err(|err| err.to_string())
            .and_then(|frame| {
                socket
                    .send_with_str(&frame)
                    .map_err(|err| dom::js_error_message(&err))
            });
        if let Err(err) = sent {
            log::warn!(target: LOG_TARGET, "could not send {msg:?}: {err}");
        }
    }
}

fn notify(shared: &Rc<RefCell<Shared>>) {
    let (callback, state) = {
        let inner = shared.borrow();
        let Some(callback) = inner.on_change.clone() else {
            return;
        };
        (callback, serde_json::to_string(inner.driver.state()))
    };
    match state {
        Ok(json) => {
            if let Err(err) = callback.call1(&JsValue::NULL, &JsValue::from_str(&json)) {
                log::warn!(target: LOG_TARGET, "onChange threw: {}", dom::js_error_message(&err));
            }
        }
        Err(err) => log::warn!(target: LOG_TARGET, "state not serializable: {err}"),
    }
}
