//! Harvest Gambit session sync
//!
//! Client-side mirror of a two-player chess + farm session. The crate keeps a
//! local copy of the authoritative session consistent with the server, repairs
//! the turn field of the board encoding when it drifts, persists a recovery
//! record for reloads, and drives the join/rejoin lifecycle. It has no browser
//! or async runtime dependencies; hosts plug in storage, a clock, a transport
//! and a chess rules engine.

pub mod config;
pub mod constants;
pub mod driver;
pub mod oracle;
pub mod persistence;
pub mod position;
pub mod protocol;
pub mod reconcile;
pub mod state;

// Re-export commonly used types
pub use config::{ConfigError, ConfigStore, ConfigVersion, CropSpec, EconomyConfig};
pub use driver::{
    ConnectionStatus, DriverConfig, ReconnectPolicy, ReconnectStep, Reconnector, SessionDriver,
};
pub use oracle::{BoardOracle, Move, MoveResult, PieceKind, PlacementBoard, Square};
pub use persistence::{
    Clock, ManualClock, MemoryStorage, PersistenceBridge, RecoverySnapshot, SnapshotStorage,
    StorageError, SystemClock,
};
pub use protocol::{
    Inbound, Outbound, PartialSessionState, ResourceAction, ResourceActionKind, ResourceData,
};
pub use reconcile::{
    Applied, MoveOutcome, PendingMove, ReconcileFault, Reconciled, ReconciliationEngine,
    Rejection, RepairPath, ResourceOutcome,
};
pub use state::{EndReason, Phase, Plot, PlotRow, PlotState, ResourceLedger, SessionState, Side};
