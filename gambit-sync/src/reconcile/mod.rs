//! Reconciliation Engine.
//!
//! Merges authoritative server updates into the local [`SessionState`],
//! repairs the embedded turn field of the board encoding when it disagrees
//! with the session's turn owner, and applies local optimistic actions.
//!
//! The engine is the only writer of `SessionState`. The position invariant
//! holds at every return: `encoded_position` always decodes to a board with
//! at least one piece.

mod farm;
mod tactical;

use log::{debug, error, warn};
use thiserror::Error;

use crate::config::ConfigStore;
use crate::constants::{INITIAL_POSITION, LOG_RECONCILE};
use crate::oracle::{BoardOracle, Move, Square, terminal_state};
use crate::position::{has_pieces, side_to_move, with_side_to_move};
use crate::protocol::{Inbound, PartialSessionState, ResourceAction};
use crate::state::{EndReason, Phase, PlotState, SessionState, Side};

pub use farm::ResourceOutcome;
pub use tactical::MoveOutcome;

/// Caller-correctable refusal of a local action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("not enough resources: need {needed}, have {available}")]
    InsufficientResource { needed: u32, available: u32 },
    #[error("illegal move {from}-{to}")]
    IllegalMove { from: Square, to: Square },
    #[error("action needs the {expected:?} phase but the turn is in {actual:?}")]
    WrongPhase { expected: Phase, actual: Phase },
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("plot {index} is not eligible (state {state:?})")]
    PlotNotEligible {
        index: usize,
        state: Option<PlotState>,
    },
    #[error("a resource action was already taken this turn")]
    ResourceActionSpent,
    #[error("captures only allow {allowed} extra plots")]
    UnlockLimitReached { allowed: usize },
    #[error("unknown crop '{crop}'")]
    UnknownCrop { crop: String },
    #[error("the session is over")]
    SessionOver,
    #[error("the session is not accepting actions right now")]
    SessionUnavailable,
}

/// Every repair attempt failed; the last known-good position was kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileFault {
    #[error("could not produce a valid position with {expected} to move")]
    RepairExhausted { expected: Side },
}

/// Which step of the repair chain produced the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairPath {
    /// Candidate already named the expected side.
    Accepted,
    /// Candidate's turn field was rewritten.
    RewroteTurn,
    /// Candidate unusable; last known-good position used instead.
    RecoveredPrevious,
    /// Nothing usable at all; standard initial position used.
    ResetToInitial,
    /// Repair exhausted; current position kept.
    Retained,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub position: String,
    pub path: RepairPath,
    pub fault: Option<ReconcileFault>,
}

/// Local tactical move waiting for the server to confirm the turn handover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMove {
    pub mv: Move,
    pub expected_turn_owner: Side,
    pub encoded_position: String,
    /// Session as it was before the move; restored if the server disagrees.
    pub before: Box<SessionState>,
}

/// Summary of what an inbound message did to the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    pub changed: bool,
    pub turn_changed: bool,
    pub superseded_optimistic: bool,
    pub repair: Option<RepairPath>,
    pub fault: Option<ReconcileFault>,
    pub ended: bool,
}

/// Exclusive owner of the session mirror and the board oracle.
#[derive(Debug)]
pub struct ReconciliationEngine<O: BoardOracle> {
    state: SessionState,
    oracle: O,
    configs: ConfigStore,
    pending: Option<PendingMove>,
}

impl<O: BoardOracle> ReconciliationEngine<O> {
    /// Wrap an existing state. The position is re-checked and loaded into the oracle.
    pub fn new(state: SessionState, oracle: O, configs: ConfigStore) -> Self {
        let mut engine = Self {
            state,
            oracle,
            configs,
            pending: None,
        };
        engine.resync_position();
        engine
    }

    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub const fn oracle(&self) -> &O {
        &self.oracle
    }

    #[must_use]
    pub const fn configs(&self) -> &ConfigStore {
        &self.configs
    }

    #[must_use]
    pub const fn pending(&self) -> Option<&PendingMove> {
        self.pending.as_ref()
    }

    /// Replace the whole session, e.g. on a fresh seat assignment or a restore.
    pub fn reset(&mut self, state: SessionState) {
        self.state = state;
        self.pending = None;
        self.resync_position();
    }

    /// Drop any optimistic move; the next authoritative snapshot is a full resync.
    pub fn clear_pending(&mut self) {
        self.pending = None;
    }

    fn resync_position(&mut self) {
        let candidate = self.state.encoded_position.clone();
        let owner = self.state.turn_owner;
        let reconciled = self.reconcile_position(&candidate, owner);
        self.commit_position(&reconciled);
    }

    /// Produce a non-empty position whose turn field names `expected_turn_owner`.
    ///
    /// Never fails: when every repair is exhausted the current position is kept
    /// and the outcome carries a [`ReconcileFault`]. Does not modify the session;
    /// the oracle may be left holding a validation candidate.
    pub fn reconcile_position(&mut self, candidate: &str, expected_turn_owner: Side) -> Reconciled {
        let previous_good = self
            .state
            .previous_encoded_position
            .clone()
            .filter(|prev| has_pieces(prev));

        let (base, fallback) = if has_pieces(candidate) {
            (candidate.to_string(), None)
        } else if let Some(good) = self.recovery_base(previous_good.as_ref()) {
            warn!(target: LOG_RECONCILE, "rejected empty position, keeping last known-good");
            (good, Some(RepairPath::RecoveredPrevious))
        } else {
            warn!(target: LOG_RECONCILE, "rejected empty position, resetting to initial");
            (INITIAL_POSITION.to_string(), Some(RepairPath::ResetToInitial))
        };

        if side_to_move(&base) == Some(expected_turn_owner) {
            return Reconciled {
                position: base,
                path: fallback.unwrap_or(RepairPath::Accepted),
                fault: None,
            };
        }

        if let Some(rewritten) = self.validated_rewrite(&base, expected_turn_owner) {
            debug!(target: LOG_RECONCILE, "rewrote turn field to {expected_turn_owner}");
            return Reconciled {
                position: rewritten,
                path: fallback.unwrap_or(RepairPath::RewroteTurn),
                fault: None,
            };
        }

        if let Some(prev) = previous_good {
            let recovered = if side_to_move(&prev) == Some(expected_turn_owner) {
                self.oracle.load(&prev).then_some(prev)
            } else {
                self.validated_rewrite(&prev, expected_turn_owner)
            };
            if let Some(position) = recovered {
                warn!(target: LOG_RECONCILE, "turn rewrite failed, recovered previous position");
                return Reconciled {
                    position,
                    path: RepairPath::RecoveredPrevious,
                    fault: None,
                };
            }
        }

        let fault = ReconcileFault::RepairExhausted {
            expected: expected_turn_owner,
        };
        error!(target: LOG_RECONCILE, "{fault}; keeping last known-good position");
        Reconciled {
            position: self.last_known_good(),
            path: RepairPath::Retained,
            fault: Some(fault),
        }
    }

    /// The newest position with pieces on it: the current one, else the previous one.
    fn recovery_base(&self, previous_good: Option<&String>) -> Option<String> {
        Some(&self.state.encoded_position)
            .filter(|pos| has_pieces(pos))
            .or(previous_good)
            .cloned()
    }

    fn validated_rewrite(&mut self, base: &str, side: Side) -> Option<String> {
        with_side_to_move(base, side)
            .filter(|rewritten| has_pieces(rewritten) && self.oracle.load(rewritten))
    }

    fn last_known_good(&self) -> String {
        [
            Some(&self.state.encoded_position),
            self.state.previous_encoded_position.as_ref(),
        ]
        .into_iter()
        .flatten()
        .find(|pos| has_pieces(pos))
        .cloned()
        .unwrap_or_else(|| INITIAL_POSITION.to_string())
    }

    /// Install a reconciled position. The outgoing one is remembered for
    /// recovery unless the position itself came from a fallback.
    fn commit_position(&mut self, reconciled: &Reconciled) {
        let position = reconciled.position.as_str();
        let fallback = matches!(
            reconciled.path,
            RepairPath::RecoveredPrevious | RepairPath::ResetToInitial
        );
        if !fallback
            && position != self.state.encoded_position
            && has_pieces(&self.state.encoded_position)
        {
            self.state.previous_encoded_position = Some(self.state.encoded_position.clone());
        }
        position.clone_into(&mut self.state.encoded_position);
        if !self.oracle.load(position) {
            error!(target: LOG_RECONCILE, "oracle refused committed position {position}");
        }
    }

    /// Merge an authoritative snapshot. Authoritative fields always win.
    pub fn apply_authoritative_snapshot(&mut self, remote: &PartialSessionState) -> Applied {
        if self.state.is_over() {
            debug!(target: LOG_RECONCILE, "ignoring snapshot after session end");
            return Applied::default();
        }
        let before = self.state.digest();
        let mut superseded = false;
        if let Some(pending) = self.pending.take() {
            let owner = remote.turn_owner.unwrap_or(self.state.turn_owner);
            if owner == pending.expected_turn_owner {
                debug!(target: LOG_RECONCILE, "server confirmed {}-{}", pending.mv.from, pending.mv.to);
            } else {
                warn!(
                    target: LOG_RECONCILE,
                    "server kept the turn with {owner}, rolling back {}-{}",
                    pending.mv.from,
                    pending.mv.to
                );
                self.state = *pending.before;
                superseded = true;
            }
        }
        let prior_owner = self.state.turn_owner;
        if let Some(owner) = remote.turn_owner {
            self.state.turn_owner = owner;
        }
        if let Some(economy) = &remote.economy {
            self.state.economy.extend(economy.iter().map(|(s, l)| (*s, *l)));
        }
        if let Some(plots) = &remote.plots {
            self.state
                .plots
                .extend(plots.iter().map(|(s, row)| (*s, row.clone())));
        }
        if let Some(captures) = &remote.captures {
            for (side, count) in captures {
                if *count < self.state.capture_count(*side) {
                    warn!(target: LOG_RECONCILE, "server lowered {side} captures to {count}");
                }
                self.state.captures.insert(*side, *count);
            }
        }

        let candidate = remote
            .encoded_position
            .clone()
            .unwrap_or_else(|| self.state.encoded_position.clone());
        let reconciled = self.reconcile_position(&candidate, self.state.turn_owner);
        self.commit_position(&reconciled);

        let mut applied = Applied {
            superseded_optimistic: superseded,
            repair: Some(reconciled.path),
            fault: reconciled.fault,
            ..Applied::default()
        };
        if self.state.turn_owner != prior_owner {
            let supplied = remote
                .plots
                .as_ref()
                .is_some_and(|plots| plots.contains_key(&self.state.turn_owner));
            self.observe_turn_change(!supplied);
            applied.turn_changed = true;
        }
        for side in Side::ALL {
            self.refresh_unlockable(side);
        }
        applied.changed = self.state.digest() != before;
        applied
    }

    /// Route one inbound message to the matching state transition.
    pub fn apply_inbound(&mut self, msg: &Inbound) -> Applied {
        let before = self.state.digest();
        let mut applied = match msg {
            Inbound::SessionAssigned { room_id, side, .. } => {
                let fresh = SessionState::new(room_id.clone(), *side, self.configs.active());
                self.reset(fresh);
                Applied::default()
            }
            Inbound::SessionSnapshot(snapshot) => self.apply_authoritative_snapshot(snapshot),
            Inbound::ReconnectAccepted {
                room_id,
                side,
                snapshot,
            } => {
                if self.state.room_id != *room_id || self.state.local_side != *side {
                    let fresh = SessionState::new(room_id.clone(), *side, self.configs.active());
                    self.reset(fresh);
                }
                self.clear_pending();
                self.apply_authoritative_snapshot(snapshot)
            }
            Inbound::OpponentTacticalMove {
                mv,
                encoded_position,
            } => self.apply_opponent_move(mv, encoded_position),
            Inbound::OpponentResourceAction {
                kind,
                plot_index,
                data,
            } => {
                let opponent = self.state.local_side.opponent();
                match ResourceAction::from_wire(*kind, data) {
                    Some(action) if !self.state.is_over() => {
                        if let Err(rejection) = self.apply_resource_action(opponent, &action, *plot_index) {
                            warn!(target: LOG_RECONCILE, "could not mirror opponent {kind:?}: {rejection}");
                        }
                    }
                    Some(_) => {}
                    None => warn!(target: LOG_RECONCILE, "opponent {kind:?} without crop type"),
                }
                Applied::default()
            }
            Inbound::SessionEnded { winner, reason } => {
                self.finish(*winner, *reason);
                Applied {
                    ended: true,
                    ..Applied::default()
                }
            }
            Inbound::PeerDisconnected => {
                self.state.peer_connected = false;
                Applied::default()
            }
            Inbound::PeerReconnected => {
                self.state.peer_connected = true;
                Applied::default()
            }
            Inbound::RoomUnavailable { .. } => Applied::default(),
            Inbound::ConfigUpdated { config } => {
                match self.configs.publish(config.clone()) {
                    Ok(active) => {
                        self.state.config_version = active.version.clone();
                        for side in Side::ALL {
                            self.refresh_unlockable(side);
                        }
                    }
                    Err(err) => warn!(target: LOG_RECONCILE, "ignored economy table: {err}"),
                }
                Applied::default()
            }
        };
        applied.ended |= self.state.is_over();
        applied.changed = self.state.digest() != before;
        applied
    }

    fn apply_opponent_move(&mut self, mv: &Move, encoded_position: &str) -> Applied {
        if self.state.is_over() {
            return Applied::default();
        }
        // The opponent only moves once the server has accepted our handover.
        self.pending = None;
        let local = self.state.local_side;
        let opponent = local.opponent();
        let handover = self.state.turn_owner != local;
        self.state.turn_owner = local;

        let reconciled = self.reconcile_position(encoded_position, local);
        self.commit_position(&reconciled);

        if handover {
            let cfg = self.configs.active().clone();
            let ledger = self.state.ledger_mut(opponent);
            ledger.balance = ledger.balance.saturating_sub(cfg.move_cost(mv.piece));
            if let Some(captured) = mv.captured {
                ledger.balance += cfg.capture_bonus_for(captured);
                *self.state.captures.entry(opponent).or_insert(0) += 1;
                self.refresh_unlockable(opponent);
            }
        }
        if let Some(reason) = terminal_state(&self.oracle) {
            let winner = (reason == EndReason::Checkmate).then_some(opponent);
            self.finish(winner, reason);
        }
        if handover && !self.state.is_over() {
            self.observe_turn_change(true);
        }
        Applied {
            turn_changed: handover,
            repair: Some(reconciled.path),
            fault: reconciled.fault,
            ..Applied::default()
        }
    }

    /// Record the terminal outcome. The first verdict sticks.
    fn finish(&mut self, winner: Option<Side>, reason: EndReason) {
        if self.state.is_over() {
            return;
        }
        self.state.winner = winner;
        self.state.end_reason = Some(reason);
        self.pending = None;
        debug!(target: LOG_RECONCILE, "session ended: {reason:?}, winner {winner:?}");
    }

    /// Bookkeeping for a turn handover to the current `turn_owner`.
    fn observe_turn_change(&mut self, advance_plots: bool) {
        self.state.turn_number += 1;
        self.state.phase = Phase::Resource;
        self.state.resource_action_used = false;
        let owner = self.state.turn_owner;
        if advance_plots {
            self.advance_turn_plots(owner);
        } else {
            let turn = self.state.turn_number;
            self.state.plots_advanced_through.insert(owner, turn);
        }
        if owner == self.state.local_side && !self.resource_phase_has_options(owner) {
            debug!(target: LOG_RECONCILE, "no eligible farm action, skipping to tactical");
            self.state.phase = Phase::Tactical;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EconomyConfig;
    use crate::oracle::PlacementBoard;
    use crate::position::same_placement;

    const MIDGAME_W: &str = "r3k2r/ppp2ppp/2n5/3qp3/3P4/2N5/PPP2PPP/R2QK2R w KQkq - 0 9";

    fn engine(local: Side) -> ReconciliationEngine<PlacementBoard> {
        let cfg = EconomyConfig::default();
        ReconciliationEngine::new(
            SessionState::new("room", local, &cfg),
            PlacementBoard::new(),
            ConfigStore::new(cfg),
        )
    }

    #[test]
    fn accepts_matching_candidate() {
        let mut eng = engine(Side::White);
        let out = eng.reconcile_position(MIDGAME_W, Side::White);
        assert_eq!(out.position, MIDGAME_W);
        assert_eq!(out.path, RepairPath::Accepted);
    }

    #[test]
    fn rewrites_turn_without_touching_pieces() {
        let mut eng = engine(Side::White);
        let out = eng.reconcile_position(MIDGAME_W, Side::Black);
        assert_eq!(out.path, RepairPath::RewroteTurn);
        assert!(same_placement(&out.position, MIDGAME_W));
        assert_eq!(side_to_move(&out.position), Some(Side::Black));
        assert_ne!(out.position, INITIAL_POSITION);
    }

    fn engine_at(position: &str, local: Side) -> ReconciliationEngine<PlacementBoard> {
        let cfg = EconomyConfig::default();
        let mut state = SessionState::new("room", local, &cfg);
        state.encoded_position = position.to_string();
        ReconciliationEngine::new(state, PlacementBoard::new(), ConfigStore::new(cfg))
    }

    #[test]
    fn empty_session_position_resets_to_initial() {
        let eng = engine_at("8/8/8/8/8/8/8/8 w - - 0 1", Side::White);
        assert_eq!(eng.state().encoded_position, INITIAL_POSITION);
        assert_eq!(eng.state().previous_encoded_position, None);
    }

    #[test]
    fn empty_snapshot_keeps_current_position() {
        let mut eng = engine(Side::White);
        eng.apply_authoritative_snapshot(&PartialSessionState {
            encoded_position: Some(MIDGAME_W.to_string()),
            ..PartialSessionState::default()
        });
        assert_eq!(eng.state().previous_encoded_position.as_deref(), Some(INITIAL_POSITION));
        let applied = eng.apply_authoritative_snapshot(&PartialSessionState {
            encoded_position: Some("8/8/8/8/8/8/8/8 w - - 0 1".to_string()),
            ..PartialSessionState::default()
        });
        assert_eq!(applied.repair, Some(RepairPath::RecoveredPrevious));
        assert_eq!(eng.state().encoded_position, MIDGAME_W);
        assert_eq!(eng.state().previous_encoded_position.as_deref(), Some(INITIAL_POSITION));
    }

    #[test]
    fn empty_candidate_rewrites_last_known_good() {
        let mut eng = engine_at(MIDGAME_W, Side::White);
        let out = eng.reconcile_position("", Side::Black);
        assert_eq!(out.path, RepairPath::RecoveredPrevious);
        assert!(same_placement(&out.position, MIDGAME_W));
        assert_eq!(side_to_move(&out.position), Some(Side::Black));
    }

    #[test]
    fn unrepairable_candidate_retains_current_position() {
        let mut eng = engine_at(MIDGAME_W, Side::White);
        assert_eq!(eng.state().previous_encoded_position, None);
        let out = eng.reconcile_position("k7/8/8/8/8/8/8/7K", Side::Black);
        assert_eq!(out.path, RepairPath::Retained);
        assert_eq!(
            out.fault,
            Some(ReconcileFault::RepairExhausted {
                expected: Side::Black
            })
        );
        assert_eq!(out.position, MIDGAME_W);

        let applied = eng.apply_authoritative_snapshot(&PartialSessionState {
            encoded_position: Some("k7/8/8/8/8/8/8/7K".to_string()),
            ..PartialSessionState::default()
        });
        assert_eq!(applied.repair, Some(RepairPath::Retained));
        assert!(matches!(
            applied.fault,
            Some(ReconcileFault::RepairExhausted { .. })
        ));
        assert_eq!(eng.state().encoded_position, MIDGAME_W);
        assert!(!applied.changed);
    }

    #[test]
    fn snapshot_overwrites_turn_owner_and_keeps_absent_fields() {
        let mut eng = engine(Side::White);
        let balance_before = eng.state().balance(Side::Black);
        let applied = eng.apply_authoritative_snapshot(&PartialSessionState {
            turn_owner: Some(Side::Black),
            captures: Some([(Side::White, 2)].into_iter().collect()),
            ..PartialSessionState::default()
        });
        assert!(applied.turn_changed);
        assert_eq!(eng.state().turn_owner, Side::Black);
        assert_eq!(side_to_move(&eng.state().encoded_position), Some(Side::Black));
        assert_eq!(eng.state().capture_count(Side::White), 2);
        assert_eq!(eng.state().balance(Side::Black), balance_before);
    }

    #[test]
    fn terminal_state_absorbs_snapshots() {
        let mut eng = engine(Side::White);
        eng.apply_inbound(&Inbound::SessionEnded {
            winner: Some(Side::Black),
            reason: EndReason::Resignation,
        });
        let before = eng.state().clone();
        let applied = eng.apply_authoritative_snapshot(&PartialSessionState {
            turn_owner: Some(Side::Black),
            encoded_position: Some(MIDGAME_W.to_string()),
            ..PartialSessionState::default()
        });
        assert!(!applied.changed);
        assert_eq!(eng.state(), &before);
        eng.apply_inbound(&Inbound::SessionEnded {
            winner: Some(Side::White),
            reason: EndReason::Checkmate,
        });
        assert_eq!(eng.state().winner, Some(Side::Black));
    }

    #[test]
    fn peer_presence_is_tracked() {
        let mut eng = engine(Side::White);
        eng.apply_inbound(&Inbound::PeerDisconnected);
        assert!(!eng.state().peer_connected);
        eng.apply_inbound(&Inbound::PeerReconnected);
        assert!(eng.state().peer_connected);
    }

    #[test]
    fn config_update_keeps_balances() {
        let mut eng = engine(Side::White);
        let mut table = EconomyConfig::default();
        table.version = "v2".into();
        table.starting_balance = 99;
        eng.apply_inbound(&Inbound::ConfigUpdated { config: table });
        assert_eq!(eng.state().config_version.0, "v2");
        assert_eq!(eng.configs().active().starting_balance, 99);
        assert_eq!(eng.state().balance(Side::White), 10);
    }
}
