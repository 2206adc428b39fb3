//! Local board moves, applied optimistically ahead of server confirmation.
use log::debug;

use super::{PendingMove, ReconciliationEngine, Rejection};
use crate::constants::LOG_RECONCILE;
use crate::oracle::{BoardOracle, Move, Square, terminal_state};
use crate::state::{EndReason, Phase, Side};

/// Result of an accepted local move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub applied: Move,
    pub cost: u32,
    pub captured: bool,
    pub encoded_position: String,
    /// Set when the move ended the game: winner (if any) and reason.
    pub ended: Option<(Option<Side>, EndReason)>,
}

impl<O: BoardOracle> ReconciliationEngine<O> {
    /// Play `from`-`to` for the local side.
    ///
    /// The ledger debit and the board change happen together: every check runs
    /// before the oracle is asked to move, and nothing is debited unless the
    /// oracle accepted the move.
    ///
    /// # Errors
    ///
    /// Rejects when the session is over, it is not the local turn, the turn is
    /// still in the resource phase, the move is illegal, or the ledger cannot
    /// cover the piece's move cost.
    pub fn apply_local_tactical_move(
        &mut self,
        from: Square,
        to: Square,
    ) -> Result<MoveOutcome, Rejection> {
        if self.state.is_over() {
            return Err(Rejection::SessionOver);
        }
        if !self.state.is_local_turn() {
            return Err(Rejection::NotYourTurn);
        }
        if self.state.phase != Phase::Tactical {
            return Err(Rejection::WrongPhase {
                expected: Phase::Tactical,
                actual: self.state.phase,
            });
        }
        let mv = self
            .oracle
            .moves_from(from)
            .into_iter()
            .find(|candidate| candidate.to == to)
            .ok_or(Rejection::IllegalMove { from, to })?;

        let mover = self.state.local_side;
        let before = Box::new(self.state.clone());
        let cfg = self.configs.active().clone();
        let cost = cfg.move_cost(mv.piece);
        let available = self.state.balance(mover);
        let remaining = available
            .checked_sub(cost)
            .ok_or(Rejection::InsufficientResource {
                needed: cost,
                available,
            })?;

        let result = self
            .oracle
            .apply_move(&mv)
            .ok_or(Rejection::IllegalMove { from, to })?;

        let captured = result.applied.captured;
        let bonus = captured.map_or(0, |piece| cfg.capture_bonus_for(piece));
        self.state.ledger_mut(mover).balance = remaining.saturating_add(bonus);
        if captured.is_some() {
            *self.state.captures.entry(mover).or_insert(0) += 1;
            self.refresh_unlockable(mover);
        }
        self.state.previous_encoded_position = Some(self.state.encoded_position.clone());
        self.state.encoded_position.clone_from(&result.encoded_position);

        let ended = terminal_state(&self.oracle).map(|reason| {
            let winner = (reason == EndReason::Checkmate).then_some(mover);
            (winner, reason)
        });
        let opponent = mover.opponent();
        self.state.turn_owner = opponent;
        if let Some((winner, reason)) = ended {
            self.finish(winner, reason);
        } else {
            self.pending = Some(PendingMove {
                mv: result.applied,
                expected_turn_owner: opponent,
                encoded_position: result.encoded_position.clone(),
                before,
            });
            self.observe_turn_change(true);
        }
        debug!(target: LOG_RECONCILE, "{mover} played {from}-{to} for {cost}");

        Ok(MoveOutcome {
            applied: result.applied,
            cost,
            captured: captured.is_some(),
            encoded_position: result.encoded_position,
            ended,
        })
    }
}
