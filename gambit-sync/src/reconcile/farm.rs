//! Farm plots: planting, harvesting, unlocking and per-turn growth.
use log::debug;

use super::{ReconciliationEngine, Rejection};
use crate::constants::LOG_RECONCILE;
use crate::oracle::BoardOracle;
use crate::protocol::ResourceAction;
use crate::state::{Phase, Plot, PlotState, Side};

/// Result of an accepted farm action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceOutcome {
    pub plot_index: usize,
    pub plot: Plot,
    pub balance: u32,
}

impl<O: BoardOracle> ReconciliationEngine<O> {
    /// Take the local side's one farm action for this turn.
    ///
    /// # Errors
    ///
    /// Rejects when it is not the local turn, the turn is past the resource
    /// phase, the action was already spent, or the plot/ledger do not allow it.
    pub fn apply_local_resource_action(
        &mut self,
        action: &ResourceAction,
        plot_index: usize,
    ) -> Result<ResourceOutcome, Rejection> {
        self.check_resource_turn()?;
        if self.state.resource_action_used {
            return Err(Rejection::ResourceActionSpent);
        }
        let local = self.state.local_side;
        let outcome = self.apply_resource_action(local, action, plot_index)?;
        self.state.resource_action_used = true;
        self.state.phase = Phase::Tactical;
        Ok(outcome)
    }

    /// Decline to farm and move on to the board.
    ///
    /// # Errors
    ///
    /// Rejects outside the local resource phase.
    pub fn end_resource_phase(&mut self) -> Result<(), Rejection> {
        self.check_resource_turn()?;
        self.state.phase = Phase::Tactical;
        Ok(())
    }

    fn check_resource_turn(&self) -> Result<(), Rejection> {
        if self.state.is_over() {
            return Err(Rejection::SessionOver);
        }
        if !self.state.is_local_turn() {
            return Err(Rejection::NotYourTurn);
        }
        if self.state.phase != Phase::Resource {
            return Err(Rejection::WrongPhase {
                expected: Phase::Resource,
                actual: self.state.phase,
            });
        }
        Ok(())
    }

    /// Apply a farm action for `side`, ledger and plot together or not at all.
    pub(super) fn apply_resource_action(
        &mut self,
        side: Side,
        action: &ResourceAction,
        plot_index: usize,
    ) -> Result<ResourceOutcome, Rejection> {
        let cfg = self.configs.active();
        let balance = self.state.balance(side);
        let captures = self.state.capture_count(side);
        let opened_extra = self.opened_extra(side);
        let plot = self
            .state
            .plots_for(side)
            .get(plot_index)
            .ok_or(Rejection::PlotNotEligible {
                index: plot_index,
                state: None,
            })?;
        let not_eligible = Rejection::PlotNotEligible {
            index: plot_index,
            state: Some(plot.state),
        };

        let (next, new_balance) = match action {
            ResourceAction::Plant { crop } => {
                if plot.state != PlotState::Empty {
                    return Err(not_eligible);
                }
                let spec = cfg.crop(crop).ok_or_else(|| Rejection::UnknownCrop {
                    crop: crop.clone(),
                })?;
                let remaining = balance
                    .checked_sub(spec.cost)
                    .ok_or(Rejection::InsufficientResource {
                        needed: spec.cost,
                        available: balance,
                    })?;
                let planted = Plot {
                    state: PlotState::Growing,
                    crop_type: Some(crop.clone()),
                    growth_stage: 0,
                    turns_remaining: spec.growth_turns,
                    just_harvested: false,
                };
                (planted, remaining)
            }
            ResourceAction::Harvest => {
                if plot.state != PlotState::Ready {
                    return Err(not_eligible);
                }
                let gained = plot
                    .crop_type
                    .as_deref()
                    .and_then(|crop| cfg.crop(crop))
                    .map_or(0, |spec| spec.yield_amount);
                let harvested = Plot {
                    just_harvested: true,
                    ..Plot::empty()
                };
                (harvested, balance.saturating_add(gained))
            }
            ResourceAction::Unlock => {
                if plot.state != PlotState::Unlockable {
                    return Err(not_eligible);
                }
                let allowed = cfg.unlocks_allowed(captures);
                if opened_extra >= allowed {
                    return Err(Rejection::UnlockLimitReached { allowed });
                }
                let remaining = balance
                    .checked_sub(cfg.unlock_cost)
                    .ok_or(Rejection::InsufficientResource {
                        needed: cfg.unlock_cost,
                        available: balance,
                    })?;
                (Plot::empty(), remaining)
            }
        };

        self.state.ledger_mut(side).balance = new_balance;
        if let Some(slot) = self.state.plots_mut(side).get_mut(plot_index) {
            *slot = next.clone();
        }
        debug!(target: LOG_RECONCILE, "{side} {:?} on plot {plot_index}", action.kind());
        Ok(ResourceOutcome {
            plot_index,
            plot: next,
            balance: new_balance,
        })
    }

    /// Grow `side`'s plots by one turn. A second call within the same turn is a no-op.
    ///
    /// Returns whether anything was advanced.
    pub fn advance_turn_plots(&mut self, side: Side) -> bool {
        let turn = self.state.turn_number;
        if self
            .state
            .plots_advanced_through
            .get(&side)
            .is_some_and(|&done| done >= turn)
        {
            return false;
        }
        for plot in self.state.plots_mut(side).iter_mut() {
            plot.just_harvested = false;
            if plot.state == PlotState::Growing {
                plot.turns_remaining = plot.turns_remaining.saturating_sub(1);
                plot.growth_stage += 1;
                if plot.turns_remaining == 0 {
                    plot.state = PlotState::Ready;
                }
            }
        }
        self.state.plots_advanced_through.insert(side, turn);
        true
    }

    /// Plots opened beyond the initially open ones.
    fn opened_extra(&self, side: Side) -> usize {
        let open = self.state.plots_for(side).iter().filter(|p| p.is_open()).count();
        open.saturating_sub(self.configs.active().initial_open_plots)
    }

    /// Offer newly earned plots for unlocking, up to what captures allow.
    pub(super) fn refresh_unlockable(&mut self, side: Side) {
        let cfg = self.configs.active();
        let allowed = cfg.unlocks_allowed(self.state.capture_count(side));
        let offered = self
            .state
            .plots_for(side)
            .iter()
            .filter(|p| p.state == PlotState::Unlockable)
            .count();
        let mut claimed = self.opened_extra(side) + offered;
        for plot in self.state.plots_mut(side).iter_mut() {
            if claimed >= allowed {
                break;
            }
            if plot.state == PlotState::Locked {
                plot.state = PlotState::Unlockable;
                claimed += 1;
            }
        }
    }

    /// Whether `side` could take any farm action right now.
    #[must_use]
    pub fn resource_phase_has_options(&self, side: Side) -> bool {
        let cfg = self.configs.active();
        let balance = self.state.balance(side);
        let can_plant = cfg.cheapest_crop_cost().is_some_and(|cost| cost <= balance);
        let can_unlock = balance >= cfg.unlock_cost
            && self.opened_extra(side) < cfg.unlocks_allowed(self.state.capture_count(side));
        self.state.plots_for(side).iter().any(|plot| match plot.state {
            PlotState::Ready => true,
            PlotState::Empty => can_plant,
            PlotState::Unlockable => can_unlock,
            PlotState::Locked | PlotState::Growing => false,
        })
    }
}
