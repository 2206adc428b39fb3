//! Session Protocol Driver.
//!
//! Owns the connection lifecycle and the outbound queue. The host feeds it
//! transport events (`handle_inbound`, `handle_disconnect`) and timer ticks,
//! opens a socket when `connect`, `tick` or `retry` ask for one, and sends
//! whatever `drain_outbound` returns.
//!
//! ```text
//! Disconnected -> Connecting -> Joined -> Active -> Ended
//!       ^              |           |        |
//!       +--------------+-----------+--------+   (drop: backoff, then Degraded)
//! ```

mod reconnect;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::{ConfigError, ConfigStore};
use crate::constants::LOG_DRIVER;
use crate::oracle::{BoardOracle, Square};
use crate::persistence::{Clock, PersistenceBridge, RecoverySnapshot, SnapshotStorage};
use crate::protocol::{Inbound, Outbound, ResourceAction};
use crate::reconcile::{Applied, MoveOutcome, ReconciliationEngine, Rejection, ResourceOutcome};
use crate::state::{SessionState, Side};

pub use reconnect::{ReconnectPolicy, ReconnectStep, Reconnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Joined,
    Active,
    Ended,
    /// Reconnection gave up; the session is read-only until `retry`.
    Degraded,
}

impl ConnectionStatus {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Joined => "joined",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Degraded => "degraded",
        }
    }

    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Joined | Self::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverConfig {
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    /// Delay between a local board move and the automatic end of turn.
    #[serde(default)]
    pub auto_end_turn_delay_ms: u64,
    #[serde(default)]
    pub jitter_seed: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            auto_end_turn_delay_ms: 0,
            jitter_seed: 0,
        }
    }
}

impl DriverConfig {
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or a value is out of range.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.reconnect.validate()?;
        Ok(cfg)
    }
}

/// Drives one client seat through join, play, drop and rejoin.
#[derive(Debug)]
pub struct SessionDriver<O: BoardOracle, S: SnapshotStorage, C: Clock> {
    engine: ReconciliationEngine<O>,
    bridge: PersistenceBridge<S, C>,
    config: DriverConfig,
    username: String,
    status: ConnectionStatus,
    outbox: VecDeque<Outbound>,
    reconnect: Reconnector,
    end_turn_at: Option<u64>,
    restored_room: Option<String>,
}

impl<O: BoardOracle, S: SnapshotStorage, C: Clock> SessionDriver<O, S, C> {
    pub fn new(
        oracle: O,
        bridge: PersistenceBridge<S, C>,
        configs: ConfigStore,
        config: DriverConfig,
        username: impl Into<String>,
    ) -> Self {
        let placeholder = SessionState::new(String::new(), Side::White, configs.active());
        Self {
            engine: ReconciliationEngine::new(placeholder, oracle, configs),
            bridge,
            reconnect: Reconnector::new(config.reconnect, config.jitter_seed),
            config,
            username: username.into(),
            status: ConnectionStatus::Disconnected,
            outbox: VecDeque::new(),
            end_turn_at: None,
            restored_room: None,
        }
    }

    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.status
    }

    #[must_use]
    pub const fn state(&self) -> &SessionState {
        self.engine.state()
    }

    #[must_use]
    pub const fn engine(&self) -> &ReconciliationEngine<O> {
        &self.engine
    }

    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub const fn reconnector(&self) -> &Reconnector {
        &self.reconnect
    }

    /// The stored recovery record, if any, without a freshness check.
    #[must_use]
    pub fn recovery_snapshot(&self) -> Option<RecoverySnapshot> {
        self.bridge.peek()
    }

    /// Messages waiting to be written to the transport, oldest first.
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        self.outbox.drain(..).collect()
    }

    /// Begin joining. A fresh recovery snapshot is laid into the session
    /// before any server message arrives and the join asks to resume it.
    ///
    /// Returns whether a snapshot was restored.
    pub fn connect(&mut self) -> bool {
        self.outbox.clear();
        self.end_turn_at = None;
        self.set_status(ConnectionStatus::Connecting);

        let window = self.config.reconnect.window_ms;
        let Some(snapshot) = self.bridge.load_if_fresh(window) else {
            self.restored_room = None;
            self.queue_join(None);
            return false;
        };
        let base = if self.engine.state().room_id == snapshot.room_id {
            self.engine.state().clone()
        } else {
            SessionState::new(
                snapshot.room_id.clone(),
                snapshot.local_side,
                self.engine.configs().active(),
            )
        };
        self.engine.reset(snapshot.restore_into(base));
        debug!(target: LOG_DRIVER, "restored room {} from recovery snapshot", snapshot.room_id);
        self.restored_room = Some(snapshot.room_id.clone());
        self.queue_join(Some(&snapshot));
        true
    }

    fn queue_join(&mut self, resume: Option<&RecoverySnapshot>) {
        self.outbox.push_back(Outbound::JoinRoom {
            username: self.username.clone(),
            room_id: resume.map(|s| s.room_id.clone()),
            is_reconnecting: resume.is_some(),
            previous_side: resume.map(|s| s.local_side),
        });
    }

    /// Parse and apply one wire frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a known inbound message; the
    /// session is left untouched.
    pub fn handle_frame(&mut self, text: &str) -> Result<Applied, serde_json::Error> {
        let msg = Inbound::from_json(text)?;
        Ok(self.handle_inbound(&msg))
    }

    /// Apply one inbound message and persist the result.
    pub fn handle_inbound(&mut self, msg: &Inbound) -> Applied {
        debug!(target: LOG_DRIVER, "inbound {}", msg.label());
        if self.status == ConnectionStatus::Ended {
            return Applied::default();
        }
        match msg {
            Inbound::RoomUnavailable { room_id } => {
                warn!(target: LOG_DRIVER, "room {room_id} is gone, joining fresh");
                self.bridge.discard();
                let fresh = SessionState::new(
                    String::new(),
                    self.engine.state().local_side,
                    self.engine.configs().active(),
                );
                self.engine.reset(fresh);
                self.reconnect.cancel();
                self.outbox.clear();
                self.end_turn_at = None;
                self.restored_room = None;
                self.set_status(ConnectionStatus::Connecting);
                self.queue_join(None);
                return Applied::default();
            }
            Inbound::SessionAssigned { room_id, .. } => {
                if self
                    .restored_room
                    .as_ref()
                    .is_some_and(|restored| restored != room_id)
                {
                    info!(target: LOG_DRIVER, "assigned to a different room, dropping recovery snapshot");
                    self.bridge.discard();
                }
                self.restored_room = None;
            }
            _ => {}
        }

        let applied = self.engine.apply_inbound(msg);
        match msg {
            Inbound::SessionAssigned { .. } => {
                self.reconnect.succeeded();
                self.set_status(ConnectionStatus::Joined);
            }
            Inbound::ReconnectAccepted { .. } => {
                self.reconnect.succeeded();
                self.restored_room = None;
                self.set_status(ConnectionStatus::Active);
            }
            Inbound::SessionSnapshot(_)
            | Inbound::OpponentTacticalMove { .. }
            | Inbound::OpponentResourceAction { .. } => {
                if matches!(
                    self.status,
                    ConnectionStatus::Connecting | ConnectionStatus::Joined
                ) {
                    self.set_status(ConnectionStatus::Active);
                }
            }
            _ => {}
        }
        if applied.superseded_optimistic
            || (applied.turn_changed && !self.engine.state().is_local_turn())
        {
            self.end_turn_at = None;
        }
        if applied.ended || self.engine.state().is_over() {
            self.conclude();
        } else {
            self.persist();
        }
        applied
    }

    /// The transport closed. Live state is kept and a rejoin is scheduled.
    pub fn handle_disconnect(&mut self) {
        match self.status {
            ConnectionStatus::Ended | ConnectionStatus::Degraded => return,
            ConnectionStatus::Disconnected if self.reconnect.is_active() => return,
            _ => {}
        }
        let now = self.bridge.now_millis();
        self.outbox.clear();
        self.end_turn_at = None;
        if self.reconnect.is_active() {
            self.reconnect.attempt_failed(now);
        } else {
            let stamped = self
                .bridge
                .peek()
                .map_or(now, |snapshot| snapshot.timestamp_millis);
            let deadline = stamped.saturating_add(self.config.reconnect.window_ms);
            self.reconnect.start(now, deadline);
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    /// Run due timers. Returns whether the host should open a connection now.
    pub fn tick(&mut self) -> bool {
        let now = self.bridge.now_millis();
        if let Some(due) = self.end_turn_at
            && now >= due
        {
            self.end_turn_at = None;
            if self.status == ConnectionStatus::Active && !self.engine.state().is_over() {
                self.queue_end_turn();
            }
        }
        match self.reconnect.poll(now) {
            ReconnectStep::Attempt { number } => {
                info!(target: LOG_DRIVER, "reconnect attempt {number}");
                self.connect();
                true
            }
            ReconnectStep::Exhausted => {
                warn!(target: LOG_DRIVER, "reconnect attempts exhausted");
                self.degrade();
                false
            }
            ReconnectStep::Expired => {
                warn!(target: LOG_DRIVER, "reconnect window expired, abandoning session");
                self.bridge.discard();
                self.degrade();
                false
            }
            ReconnectStep::Idle | ReconnectStep::Waiting { .. } => false,
        }
    }

    /// Stop trying to reconnect and stay read-only.
    pub fn cancel_reconnect(&mut self) {
        if self.reconnect.is_active() || self.status == ConnectionStatus::Disconnected {
            self.degrade();
        }
    }

    /// Explicit user retry from a dropped or degraded session.
    ///
    /// Returns whether the host should open a connection now.
    pub fn retry(&mut self) -> bool {
        match self.status {
            ConnectionStatus::Degraded
            | ConnectionStatus::Disconnected
            | ConnectionStatus::Connecting => {
                self.reconnect.cancel();
                self.connect();
                true
            }
            ConnectionStatus::Joined | ConnectionStatus::Active | ConnectionStatus::Ended => false,
        }
    }

    /// Play a board move and queue it for the server.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::SessionUnavailable`] unless the session is active,
    /// and any rejection from the engine.
    pub fn play_move(&mut self, from: Square, to: Square) -> Result<MoveOutcome, Rejection> {
        self.require_active()?;
        let outcome = self.engine.apply_local_tactical_move(from, to)?;
        self.outbox.push_back(Outbound::TacticalMove {
            mv: outcome.applied.clone(),
            encoded_position: outcome.encoded_position.clone(),
        });
        if let Some((winner, reason)) = outcome.ended {
            self.outbox.push_back(Outbound::SessionOver { winner, reason });
            self.conclude();
        } else {
            let delay = self.config.auto_end_turn_delay_ms;
            if delay == 0 {
                self.queue_end_turn();
            } else {
                self.end_turn_at = Some(self.bridge.now_millis().saturating_add(delay));
            }
            self.persist();
        }
        Ok(outcome)
    }

    /// Take a farm action and queue it for the server.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::SessionUnavailable`] unless the session is active,
    /// and any rejection from the engine.
    pub fn resource_action(
        &mut self,
        action: &ResourceAction,
        plot_index: usize,
    ) -> Result<ResourceOutcome, Rejection> {
        self.require_active()?;
        let outcome = self.engine.apply_local_resource_action(action, plot_index)?;
        self.outbox.push_back(Outbound::ResourceAction {
            kind: action.kind(),
            plot_index,
            data: action.data(),
        });
        self.persist();
        Ok(outcome)
    }

    /// Skip farming this turn.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::SessionUnavailable`] unless the session is active,
    /// and any rejection from the engine.
    pub fn end_resource_phase(&mut self) -> Result<(), Rejection> {
        self.require_active()?;
        self.engine.end_resource_phase()?;
        self.persist();
        Ok(())
    }

    fn require_active(&self) -> Result<(), Rejection> {
        match self.status {
            ConnectionStatus::Active => Ok(()),
            ConnectionStatus::Ended => Err(Rejection::SessionOver),
            _ => Err(Rejection::SessionUnavailable),
        }
    }

    fn queue_end_turn(&mut self) {
        self.outbox.push_back(Outbound::EndTurn {
            encoded_position: self.engine.state().encoded_position.clone(),
        });
    }

    fn persist(&mut self) {
        let state = self.engine.state();
        if self.status.is_live() && !state.is_over() && !state.room_id.is_empty() {
            self.bridge.save(state, &self.username);
        }
    }

    fn conclude(&mut self) {
        self.bridge.discard();
        self.reconnect.cancel();
        self.end_turn_at = None;
        self.set_status(ConnectionStatus::Ended);
    }

    fn degrade(&mut self) {
        self.reconnect.cancel();
        self.outbox.clear();
        self.set_status(ConnectionStatus::Degraded);
    }

    fn set_status(&mut self, next: ConnectionStatus) {
        if self.status != next {
            info!(target: LOG_DRIVER, "connection {:?} -> {next:?}", self.status);
            self.status = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EconomyConfig;
    use crate::oracle::PlacementBoard;
    use crate::persistence::{ManualClock, MemoryStorage};
    use crate::protocol::PartialSessionState;
    use crate::state::Phase;

    type TestDriver = SessionDriver<PlacementBoard, MemoryStorage, ManualClock>;

    fn driver(storage: &MemoryStorage, clock: &ManualClock) -> TestDriver {
        SessionDriver::new(
            PlacementBoard::new(),
            PersistenceBridge::new(storage.clone(), clock.clone()),
            ConfigStore::new(EconomyConfig::default()),
            DriverConfig {
                reconnect: ReconnectPolicy {
                    jitter_ratio: 0.0,
                    ..ReconnectPolicy::default()
                },
                ..DriverConfig::default()
            },
            "ada",
        )
    }

    fn active_white(storage: &MemoryStorage, clock: &ManualClock) -> TestDriver {
        let mut drv = driver(storage, clock);
        drv.connect();
        drv.handle_inbound(&Inbound::SessionAssigned {
            room_id: "r1".to_string(),
            side: Side::White,
            is_first_player: true,
        });
        drv.handle_inbound(&Inbound::SessionSnapshot(PartialSessionState {
            turn_owner: Some(Side::White),
            ..PartialSessionState::default()
        }));
        drv.drain_outbound();
        drv
    }

    fn sq(text: &str) -> Square {
        Square::parse(text).unwrap()
    }

    #[test]
    fn fresh_join_walks_the_status_machine() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::starting_at(10_000);
        let mut drv = driver(&storage, &clock);
        assert!(!drv.connect());
        assert_eq!(drv.status(), ConnectionStatus::Connecting);
        assert_eq!(
            drv.drain_outbound(),
            vec![Outbound::JoinRoom {
                username: "ada".to_string(),
                room_id: None,
                is_reconnecting: false,
                previous_side: None,
            }]
        );
        drv.handle_inbound(&Inbound::SessionAssigned {
            room_id: "r1".to_string(),
            side: Side::Black,
            is_first_player: false,
        });
        assert_eq!(drv.status(), ConnectionStatus::Joined);
        assert_eq!(drv.recovery_snapshot().unwrap().room_id, "r1");
        drv.handle_inbound(&Inbound::SessionSnapshot(PartialSessionState::default()));
        assert_eq!(drv.status(), ConnectionStatus::Active);
    }

    #[test]
    fn actions_need_an_active_session() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::default();
        let mut drv = driver(&storage, &clock);
        assert_eq!(
            drv.end_resource_phase(),
            Err(Rejection::SessionUnavailable)
        );
    }

    #[test]
    fn local_move_queues_move_and_end_turn() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::starting_at(1);
        let mut drv = active_white(&storage, &clock);
        drv.end_resource_phase().unwrap();
        drv.play_move(sq("e2"), sq("e4")).unwrap();
        let sent = drv.drain_outbound();
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0], Outbound::TacticalMove { .. }));
        assert!(matches!(sent[1], Outbound::EndTurn { .. }));
        let saved = drv.recovery_snapshot().unwrap();
        assert_eq!(saved.encoded_position, drv.state().encoded_position);
    }

    #[test]
    fn delayed_end_turn_waits_for_tick() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::starting_at(1);
        let mut drv = active_white(&storage, &clock);
        drv.config.auto_end_turn_delay_ms = 1_500;
        drv.end_resource_phase().unwrap();
        drv.play_move(sq("e2"), sq("e4")).unwrap();
        assert_eq!(drv.drain_outbound().len(), 1);
        clock.advance(1_000);
        drv.tick();
        assert!(drv.drain_outbound().is_empty());
        clock.advance(500);
        drv.tick();
        assert!(matches!(
            drv.drain_outbound().as_slice(),
            [Outbound::EndTurn { .. }]
        ));
    }

    #[test]
    fn drop_backs_off_then_rejoins_with_snapshot() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::starting_at(1_000);
        let mut drv = active_white(&storage, &clock);
        drv.handle_disconnect();
        assert_eq!(drv.status(), ConnectionStatus::Disconnected);
        assert_eq!(drv.state().room_id, "r1");
        assert!(!drv.tick());
        clock.advance(500);
        assert!(drv.tick());
        assert_eq!(drv.status(), ConnectionStatus::Connecting);
        assert_eq!(
            drv.drain_outbound(),
            vec![Outbound::JoinRoom {
                username: "ada".to_string(),
                room_id: Some("r1".to_string()),
                is_reconnecting: true,
                previous_side: Some(Side::White),
            }]
        );
        drv.handle_inbound(&Inbound::ReconnectAccepted {
            room_id: "r1".to_string(),
            side: Side::White,
            snapshot: PartialSessionState {
                turn_owner: Some(Side::White),
                ..PartialSessionState::default()
            },
        });
        assert_eq!(drv.status(), ConnectionStatus::Active);
        assert!(!drv.reconnector().is_active());
    }

    #[test]
    fn exhausted_attempts_degrade_and_retry_recovers() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::starting_at(1_000);
        let mut drv = active_white(&storage, &clock);
        drv.handle_disconnect();
        for _ in 0..drv.config.reconnect.max_attempts {
            clock.advance(8_000);
            assert!(drv.tick());
            drv.handle_disconnect();
        }
        clock.advance(8_000);
        assert!(!drv.tick());
        assert_eq!(drv.status(), ConnectionStatus::Degraded);
        assert!(drv.recovery_snapshot().is_some());
        assert_eq!(
            drv.play_move(sq("e2"), sq("e4")),
            Err(Rejection::SessionUnavailable)
        );
        assert!(drv.retry());
        assert_eq!(drv.status(), ConnectionStatus::Connecting);
    }

    #[test]
    fn window_expiry_discards_snapshot() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::starting_at(1_000);
        let mut drv = active_white(&storage, &clock);
        drv.handle_disconnect();
        clock.advance(5 * 60 * 1000 + 1);
        assert!(!drv.tick());
        assert_eq!(drv.status(), ConnectionStatus::Degraded);
        assert!(storage.is_empty());
    }

    #[test]
    fn room_unavailable_rejoins_fresh() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::starting_at(1_000);
        let mut drv = active_white(&storage, &clock);
        drv.handle_inbound(&Inbound::RoomUnavailable {
            room_id: "r1".to_string(),
        });
        assert!(storage.is_empty());
        assert_eq!(drv.state().room_id, "");
        assert!(matches!(
            drv.drain_outbound().as_slice(),
            [Outbound::JoinRoom {
                is_reconnecting: false,
                ..
            }]
        ));
    }

    #[test]
    fn session_end_clears_snapshot_and_locks_actions() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::starting_at(1_000);
        let mut drv = active_white(&storage, &clock);
        drv.handle_inbound(&Inbound::SessionEnded {
            winner: Some(Side::Black),
            reason: crate::state::EndReason::Resignation,
        });
        assert_eq!(drv.status(), ConnectionStatus::Ended);
        assert!(storage.is_empty());
        assert_eq!(drv.end_resource_phase(), Err(Rejection::SessionOver));
        drv.handle_disconnect();
        assert_eq!(drv.status(), ConnectionStatus::Ended);
    }

    #[test]
    fn turn_handover_to_local_starts_in_resource_phase() {
        let storage = MemoryStorage::new();
        let clock = ManualClock::starting_at(1_000);
        let mut drv = active_white(&storage, &clock);
        drv.end_resource_phase().unwrap();
        drv.play_move(sq("e2"), sq("e4")).unwrap();
        drv.handle_inbound(&Inbound::OpponentTacticalMove {
            mv: crate::oracle::Move {
                from: sq("e7"),
                to: sq("e5"),
                piece: crate::oracle::PieceKind::Pawn,
                captured: None,
                promotion: None,
            },
            encoded_position: "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2"
                .to_string(),
        });
        assert_eq!(drv.state().turn_owner, Side::White);
        assert_eq!(drv.state().phase, Phase::Resource);
        assert_eq!(drv.state().balance(Side::Black), 9);
    }
}
