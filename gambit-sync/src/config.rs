//! Versioned economy tables.
//!
//! The server publishes an economy table under a version tag. Tables are
//! prospective: activating a new version changes costs and yields for actions
//! taken afterwards but never rewrites balances already in the ledger.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::constants::{
    DEFAULT_CONFIG_VERSION, INITIAL_OPEN_PLOTS, LOG_CONFIG, PLOT_COUNT, STARTING_BALANCE,
    UNLOCK_COST,
};
use crate::oracle::PieceKind;
use crate::state::{Plot, PlotRow};

/// Version tag supplied by the server alongside an economy table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigVersion(pub String);

impl Default for ConfigVersion {
    fn default() -> Self {
        Self(DEFAULT_CONFIG_VERSION.to_string())
    }
}

impl fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConfigVersion {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Planting parameters for one crop type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropSpec {
    pub cost: u32,
    pub yield_amount: u32,
    pub growth_turns: u32,
}

/// Errors raised when an economy table is malformed or unknown.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("economy table could not be parsed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no economy table registered for version {0}")]
    UnknownVersion(ConfigVersion),
    #[error("initial open plots {open} exceed plot count {total}")]
    OpenPlotsExceedTotal { open: usize, total: usize },
    #[error("{thresholds} unlock thresholds but only {lockable} lockable plots")]
    TooManyThresholds { thresholds: usize, lockable: usize },
    #[error("unlock thresholds must be non-decreasing")]
    ThresholdsUnsorted,
    #[error("crop {crop} must take at least one turn to grow")]
    ZeroGrowth { crop: String },
    #[error("{field} {reason}")]
    RangeViolation {
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EconomyConfig {
    #[serde(default)]
    pub version: ConfigVersion,
    #[serde(default = "EconomyConfig::default_starting_balance")]
    pub starting_balance: u32,
    #[serde(default = "EconomyConfig::default_move_costs")]
    pub move_costs: BTreeMap<PieceKind, u32>,
    #[serde(default)]
    pub capture_bonus: BTreeMap<PieceKind, u32>,
    #[serde(default = "EconomyConfig::default_crops")]
    pub crops: BTreeMap<String, CropSpec>,
    #[serde(default = "EconomyConfig::default_unlock_cost")]
    pub unlock_cost: u32,
    /// Captures required for the n-th plot beyond the initially open ones.
    #[serde(default = "EconomyConfig::default_unlock_thresholds")]
    pub unlock_thresholds: Vec<u32>,
    #[serde(default = "EconomyConfig::default_plot_count")]
    pub plot_count: usize,
    #[serde(default = "EconomyConfig::default_initial_open_plots")]
    pub initial_open_plots: usize,
}

impl EconomyConfig {
    const fn default_starting_balance() -> u32 {
        STARTING_BALANCE
    }

    fn default_move_costs() -> BTreeMap<PieceKind, u32> {
        BTreeMap::from([
            (PieceKind::Pawn, 1),
            (PieceKind::Knight, 3),
            (PieceKind::Bishop, 3),
            (PieceKind::Rook, 5),
            (PieceKind::Queen, 9),
            (PieceKind::King, 0),
        ])
    }

    fn default_crops() -> BTreeMap<String, CropSpec> {
        BTreeMap::from([
            (
                "wheat".to_string(),
                CropSpec {
                    cost: 2,
                    yield_amount: 5,
                    growth_turns: 2,
                },
            ),
            (
                "corn".to_string(),
                CropSpec {
                    cost: 3,
                    yield_amount: 8,
                    growth_turns: 3,
                },
            ),
            (
                "pumpkin".to_string(),
                CropSpec {
                    cost: 5,
                    yield_amount: 14,
                    growth_turns: 4,
                },
            ),
        ])
    }

    const fn default_unlock_cost() -> u32 {
        UNLOCK_COST
    }

    fn default_unlock_thresholds() -> Vec<u32> {
        vec![1, 3, 5, 8]
    }

    const fn default_plot_count() -> usize {
        PLOT_COUNT
    }

    const fn default_initial_open_plots() -> usize {
        INITIAL_OPEN_PLOTS
    }

    /// Parse a table from JSON and check it.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the table violates an invariant.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Table bundled with the crate; falls back to the compiled defaults.
    #[must_use]
    pub fn load_from_static() -> Self {
        Self::from_json(include_str!("../assets/economy.json")).unwrap_or_else(|err| {
            log::warn!(
                target: LOG_CONFIG,
                "bundled economy table rejected, using defaults: {err}"
            );
            Self::default()
        })
    }

    /// Check the structural invariants of the table.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_open_plots > self.plot_count {
            return Err(ConfigError::OpenPlotsExceedTotal {
                open: self.initial_open_plots,
                total: self.plot_count,
            });
        }
        let lockable = self.plot_count - self.initial_open_plots;
        if self.unlock_thresholds.len() > lockable {
            return Err(ConfigError::TooManyThresholds {
                thresholds: self.unlock_thresholds.len(),
                lockable,
            });
        }
        if self.unlock_thresholds.windows(2).any(|w| w[0] > w[1]) {
            return Err(ConfigError::ThresholdsUnsorted);
        }
        if let Some((name, _)) = self.crops.iter().find(|(_, spec)| spec.growth_turns == 0) {
            return Err(ConfigError::ZeroGrowth { crop: name.clone() });
        }
        Ok(())
    }

    #[must_use]
    pub fn move_cost(&self, piece: PieceKind) -> u32 {
        self.move_costs.get(&piece).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn capture_bonus_for(&self, piece: PieceKind) -> u32 {
        self.capture_bonus.get(&piece).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn crop(&self, name: &str) -> Option<&CropSpec> {
        self.crops.get(name)
    }

    #[must_use]
    pub fn cheapest_crop_cost(&self) -> Option<u32> {
        self.crops.values().map(|spec| spec.cost).min()
    }

    /// Number of extra plots a side may have opened with `captures` captures.
    #[must_use]
    pub fn unlocks_allowed(&self, captures: u32) -> usize {
        self.unlock_thresholds
            .iter()
            .filter(|&&needed| captures >= needed)
            .count()
    }

    /// Plot row for a side that has not farmed yet.
    #[must_use]
    pub fn initial_plots(&self) -> PlotRow {
        (0..self.plot_count)
            .map(|idx| {
                if idx < self.initial_open_plots {
                    Plot::empty()
                } else {
                    Plot::locked()
                }
            })
            .collect()
    }
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            version: ConfigVersion::default(),
            starting_balance: Self::default_starting_balance(),
            move_costs: Self::default_move_costs(),
            capture_bonus: BTreeMap::new(),
            crops: Self::default_crops(),
            unlock_cost: Self::default_unlock_cost(),
            unlock_thresholds: Self::default_unlock_thresholds(),
            plot_count: Self::default_plot_count(),
            initial_open_plots: Self::default_initial_open_plots(),
        }
    }
}

/// Every economy table the server has published this session.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    tables: BTreeMap<ConfigVersion, EconomyConfig>,
    active: ConfigVersion,
}

impl ConfigStore {
    #[must_use]
    pub fn new(initial: EconomyConfig) -> Self {
        let active = initial.version.clone();
        Self {
            tables: BTreeMap::from([(active.clone(), initial)]),
            active,
        }
    }

    #[must_use]
    pub fn get(&self, version: &ConfigVersion) -> Option<&EconomyConfig> {
        self.tables.get(version)
    }

    #[must_use]
    pub fn active(&self) -> &EconomyConfig {
        // `active` always names a registered table; see `new` and `activate`.
        self.tables
            .get(&self.active)
            .or_else(|| self.tables.values().next())
            .unwrap_or_else(|| default_table())
    }

    #[must_use]
    pub const fn active_version(&self) -> &ConfigVersion {
        &self.active
    }

    /// Register a table under its own version tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the table fails validation.
    pub fn insert(&mut self, table: EconomyConfig) -> Result<(), ConfigError> {
        table.validate()?;
        self.tables.insert(table.version.clone(), table);
        Ok(())
    }

    /// Make a registered version the one used for new actions.
    ///
    /// # Errors
    ///
    /// Returns an error if no table is registered under `version`.
    pub fn activate(&mut self, version: &ConfigVersion) -> Result<&EconomyConfig, ConfigError> {
        if !self.tables.contains_key(version) {
            return Err(ConfigError::UnknownVersion(version.clone()));
        }
        self.active = version.clone();
        Ok(self.active())
    }

    /// Register and activate in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if the table fails validation.
    pub fn publish(&mut self, table: EconomyConfig) -> Result<&EconomyConfig, ConfigError> {
        let version = table.version.clone();
        self.insert(table)?;
        self.activate(&version)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(EconomyConfig::load_from_static())
    }
}

fn default_table() -> &'static EconomyConfig {
    static DEFAULT: once_cell::sync::Lazy<EconomyConfig> =
        once_cell::sync::Lazy::new(EconomyConfig::default);
    &DEFAULT
}
