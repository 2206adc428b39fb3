//! Fixed values shared by the session layer.
//!
//! Tuning that the server may change at runtime lives in the economy table
//! (`crate::config`); everything here is a protocol or storage contract and
//! only changes with a code review.

/// Storage key under which the single recovery snapshot is kept.
pub const RECOVERY_STORAGE_KEY: &str = "gambit.recovery";

/// A recovery snapshot older than this is treated as absent.
pub const RECOVERY_FRESHNESS_MS: u64 = 5 * 60 * 1000;

/// Standard initial chess position, white to move.
pub const INITIAL_POSITION: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Version tag used before the server has published an economy table.
pub const DEFAULT_CONFIG_VERSION: &str = "builtin";

// Reconnection defaults -----------------------------------------------------
pub(crate) const RECONNECT_BASE_DELAY_MS: u64 = 500;
pub(crate) const RECONNECT_MAX_DELAY_MS: u64 = 8_000;
pub(crate) const RECONNECT_MAX_ATTEMPTS: u32 = 6;
pub(crate) const RECONNECT_JITTER_RATIO: f32 = 0.2;

// Economy defaults ----------------------------------------------------------
pub(crate) const STARTING_BALANCE: u32 = 10;
pub(crate) const UNLOCK_COST: u32 = 4;
pub(crate) const PLOT_COUNT: usize = 6;
pub(crate) const INITIAL_OPEN_PLOTS: usize = 2;

// Log targets ---------------------------------------------------------------
pub(crate) const LOG_RECONCILE: &str = "gambit::reconcile";
pub(crate) const LOG_DRIVER: &str = "gambit::driver";
pub(crate) const LOG_PERSIST: &str = "gambit::persist";
pub(crate) const LOG_CONFIG: &str = "gambit::config";
