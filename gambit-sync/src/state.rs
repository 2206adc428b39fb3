//! Session state mirrored from the authoritative server.
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;
use twox_hash::XxHash64;

use crate::config::{ConfigVersion, EconomyConfig};
use crate::constants::INITIAL_POSITION;

/// One of the two players in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub const ALL: [Self; 2] = [Self::White, Self::Black];

    #[must_use]
    pub const fn opponent(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }

    /// Character used for this side in the turn field of an encoded position.
    #[must_use]
    pub const fn fen_char(self) -> char {
        match self {
            Self::White => 'w',
            Self::Black => 'b',
        }
    }

    #[must_use]
    pub const fn from_fen_char(c: char) -> Option<Self> {
        match c {
            'w' => Some(Self::White),
            'b' => Some(Self::Black),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::White => "white",
            Self::Black => "black",
        })
    }
}

/// Sub-turn step. `Resource` always precedes `Tactical` within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Resource,
    Tactical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotState {
    Locked,
    Unlockable,
    Empty,
    Growing,
    Ready,
}

impl fmt::Display for PlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Locked => "locked",
            Self::Unlockable => "unlockable",
            Self::Empty => "empty",
            Self::Growing => "growing",
            Self::Ready => "ready",
        };
        f.write_str(label)
    }
}

/// A single farm plot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plot {
    pub state: PlotState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_type: Option<String>,
    #[serde(default)]
    pub growth_stage: u32,
    #[serde(default)]
    pub turns_remaining: u32,
    /// Set when the plot was harvested during the owner's current turn.
    #[serde(default)]
    pub just_harvested: bool,
}

impl Plot {
    #[must_use]
    pub const fn locked() -> Self {
        Self::with_state(PlotState::Locked)
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self::with_state(PlotState::Empty)
    }

    const fn with_state(state: PlotState) -> Self {
        Self {
            state,
            crop_type: None,
            growth_stage: 0,
            turns_remaining: 0,
            just_harvested: false,
        }
    }

    /// Plots that have been opened at some point (anything past `Unlockable`).
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(
            self.state,
            PlotState::Empty | PlotState::Growing | PlotState::Ready
        )
    }
}

pub type PlotRow = SmallVec<[Plot; 8]>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLedger {
    pub balance: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Checkmate,
    Stalemate,
    Draw,
    Resignation,
    Abandonment,
}

/// Local mirror of the authoritative session record.
///
/// Owned by [`crate::reconcile::ReconciliationEngine`]; everything else reads
/// it through shared borrows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub room_id: String,
    pub local_side: Side,
    pub turn_owner: Side,
    pub phase: Phase,
    /// Count of turn changes observed since the session started.
    #[serde(default)]
    pub turn_number: u32,
    #[serde(default)]
    pub resource_action_used: bool,
    pub economy: BTreeMap<Side, ResourceLedger>,
    pub plots: BTreeMap<Side, PlotRow>,
    pub captures: BTreeMap<Side, u32>,
    pub encoded_position: String,
    #[serde(default)]
    pub previous_encoded_position: Option<String>,
    #[serde(default)]
    pub winner: Option<Side>,
    #[serde(default)]
    pub end_reason: Option<EndReason>,
    pub config_version: ConfigVersion,
    /// Last turn number for which each side's plots were advanced.
    #[serde(default)]
    pub plots_advanced_through: BTreeMap<Side, u32>,
    #[serde(default = "default_peer_connected")]
    pub peer_connected: bool,
}

const fn default_peer_connected() -> bool {
    true
}

impl SessionState {
    /// Fresh state for a newly assigned seat.
    #[must_use]
    pub fn new(room_id: impl Into<String>, local_side: Side, config: &EconomyConfig) -> Self {
        let mut economy = BTreeMap::new();
        let mut plots = BTreeMap::new();
        let mut captures = BTreeMap::new();
        for side in Side::ALL {
            economy.insert(
                side,
                ResourceLedger {
                    balance: config.starting_balance,
                },
            );
            plots.insert(side, config.initial_plots());
            captures.insert(side, 0);
        }
        Self {
            room_id: room_id.into(),
            local_side,
            turn_owner: Side::White,
            phase: Phase::Resource,
            turn_number: 0,
            resource_action_used: false,
            economy,
            plots,
            captures,
            encoded_position: INITIAL_POSITION.to_string(),
            previous_encoded_position: None,
            winner: None,
            end_reason: None,
            config_version: config.version.clone(),
            plots_advanced_through: BTreeMap::new(),
            peer_connected: true,
        }
    }

    /// Terminal state is absorbing; nothing tactical or economic changes after it.
    #[must_use]
    pub const fn is_over(&self) -> bool {
        self.end_reason.is_some()
    }

    #[must_use]
    pub fn is_local_turn(&self) -> bool {
        self.turn_owner == self.local_side
    }

    #[must_use]
    pub fn balance(&self, side: Side) -> u32 {
        self.economy.get(&side).map_or(0, |ledger| ledger.balance)
    }

    #[must_use]
    pub fn capture_count(&self, side: Side) -> u32 {
        self.captures.get(&side).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn plots_for(&self, side: Side) -> &[Plot] {
        self.plots
            .get(&side)
            .map(|row| row.as_slice())
            .unwrap_or_default()
    }

    pub(crate) fn ledger_mut(&mut self, side: Side) -> &mut ResourceLedger {
        self.economy.entry(side).or_default()
    }

    pub(crate) fn plots_mut(&mut self, side: Side) -> &mut PlotRow {
        self.plots.entry(side).or_default()
    }

    /// Stable fingerprint of the whole record, used to spot no-op merges.
    #[must_use]
    pub fn digest(&self) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        match serde_json::to_vec(self) {
            Ok(bytes) => hasher.write(&bytes),
            Err(err) => hasher.write(err.to_string().as_bytes()),
        }
        hasher.finish()
    }
}
