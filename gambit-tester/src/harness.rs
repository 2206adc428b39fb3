//! Replay harness: one seat's driver plus the storage and clock it survives reloads with.
use anyhow::{Context, Result, bail, ensure};
use gambit_sync::position::{has_pieces, side_to_move};
use gambit_sync::{
    ConfigStore, ConnectionStatus, DriverConfig, EconomyConfig, Inbound, ManualClock,
    MemoryStorage, Outbound, PartialSessionState, PersistenceBridge, Phase, PlacementBoard,
    Rejection, ResourceAction, SessionDriver, Side, Square,
};

pub type Driver = SessionDriver<PlacementBoard, MemoryStorage, ManualClock>;

/// Wall clock the replays start from.
pub const REPLAY_EPOCH_MS: u64 = 1_700_000_000_000;
pub const REPLAY_USERNAME: &str = "qa-bot";

/// A user action taken through the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalAction {
    Play(&'static str, &'static str),
    Farm(ResourceAction, usize),
    SkipFarm,
}

pub type Check = fn(&Harness) -> Result<()>;

#[derive(Debug, Clone)]
pub enum Step {
    /// Host opens the page and joins.
    Connect,
    /// One server frame, as text.
    Frame(String),
    /// The state the client already holds, sent back as an authoritative snapshot.
    Echo,
    Local(LocalAction),
    Refused(LocalAction, Rejection),
    Disconnect,
    Advance(u64),
    Tick,
    /// Page reload: the driver is rebuilt, storage and clock survive.
    Reload,
    Retry,
    CancelReconnect,
    ExpectStatus(ConnectionStatus),
    ExpectOwner(Side),
    ExpectTurn(Side, Phase),
    ExpectBalance(Side, u32),
    ExpectLastSent(fn(&Outbound) -> bool),
    Check(&'static str, Check),
}

impl Step {
    pub fn frame(value: &serde_json::Value) -> Self {
        Self::Frame(value.to_string())
    }

    pub fn label(&self) -> String {
        match self {
            Self::Frame(text) => {
                let kind = serde_json::from_str::<serde_json::Value>(text)
                    .ok()
                    .and_then(|v| v["type"].as_str().map(str::to_string))
                    .unwrap_or_else(|| "?".to_string());
                format!("frame {kind}")
            }
            Self::Check(name, _) => format!("check {name}"),
            Self::ExpectLastSent(_) => "expect last sent".to_string(),
            other => format!("{other:?}"),
        }
    }
}

#[derive(Debug)]
pub struct Harness {
    storage: MemoryStorage,
    clock: ManualClock,
    config: DriverConfig,
    driver: Driver,
    sent: Vec<Outbound>,
}

impl Harness {
    pub fn new(seed: u64) -> Self {
        let storage = MemoryStorage::new();
        let clock = ManualClock::starting_at(REPLAY_EPOCH_MS);
        let config = DriverConfig {
            jitter_seed: seed,
            ..DriverConfig::default()
        };
        let driver = Self::build(&storage, &clock, config);
        Self {
            storage,
            clock,
            config,
            driver,
            sent: Vec::new(),
        }
    }

    fn build(storage: &MemoryStorage, clock: &ManualClock, config: DriverConfig) -> Driver {
        SessionDriver::new(
            PlacementBoard::new(),
            PersistenceBridge::new(storage.clone(), clock.clone()),
            ConfigStore::new(EconomyConfig::load_from_static()),
            config,
            REPLAY_USERNAME,
        )
    }

    pub const fn driver(&self) -> &Driver {
        &self.driver
    }

    pub const fn storage(&self) -> &MemoryStorage {
        &self.storage
    }

    /// Everything the seat has sent since the last reload.
    pub fn sent(&self) -> &[Outbound] {
        &self.sent
    }

    pub fn apply(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Connect => {
                self.driver.connect();
            }
            Step::Frame(text) => {
                self.driver
                    .handle_frame(text)
                    .with_context(|| format!("unreadable frame {text}"))?;
            }
            Step::Echo => self.echo()?,
            Step::Local(action) => self.act(action)?,
            Step::Refused(action, expected) => match self.act(action) {
                Ok(()) => bail!("{action:?} was accepted, expected {expected}"),
                Err(err) => {
                    let got = err.downcast_ref::<Rejection>();
                    ensure!(got == Some(expected), "expected {expected}, got {err:#}");
                }
            },
            Step::Disconnect => self.driver.handle_disconnect(),
            Step::Advance(ms) => self.clock.advance(*ms),
            Step::Tick => {
                self.driver.tick();
            }
            Step::Reload => {
                self.driver = Self::build(&self.storage, &self.clock, self.config);
                self.sent.clear();
            }
            Step::Retry => {
                self.driver.retry();
            }
            Step::CancelReconnect => self.driver.cancel_reconnect(),
            Step::ExpectStatus(status) => {
                let actual = self.driver.status();
                ensure!(actual == *status, "status {actual:?}, expected {status:?}");
            }
            Step::ExpectOwner(owner) => {
                let actual = self.driver.state().turn_owner;
                ensure!(actual == *owner, "turn owner {actual}, expected {owner}");
            }
            Step::ExpectTurn(owner, phase) => {
                let state = self.driver.state();
                ensure!(
                    state.turn_owner == *owner && state.phase == *phase,
                    "turn {:?}/{:?}, expected {owner:?}/{phase:?}",
                    state.turn_owner,
                    state.phase
                );
            }
            Step::ExpectBalance(side, balance) => {
                let actual = self.driver.state().balance(*side);
                ensure!(actual == *balance, "{side} balance {actual}, expected {balance}");
            }
            Step::ExpectLastSent(predicate) => {
                let last = self.sent.last().context("nothing was sent")?;
                ensure!(predicate(last), "unexpected last message {last:?}");
            }
            Step::Check(_, check) => check(self)?,
        }
        self.sent.extend(self.driver.drain_outbound());
        self.check_position()
    }

    fn act(&mut self, action: &LocalAction) -> Result<()> {
        match action {
            LocalAction::Play(from, to) => {
                let from = square(from)?;
                let to = square(to)?;
                self.driver.play_move(from, to)?;
            }
            LocalAction::Farm(action, plot) => {
                self.driver.resource_action(action, *plot)?;
            }
            LocalAction::SkipFarm => self.driver.end_resource_phase()?,
        }
        Ok(())
    }

    fn echo(&mut self) -> Result<()> {
        let held = self.driver.state().clone();
        let applied = self
            .driver
            .handle_inbound(&Inbound::SessionSnapshot(PartialSessionState {
                turn_owner: Some(held.turn_owner),
                encoded_position: Some(held.encoded_position.clone()),
                economy: Some(held.economy.clone()),
                plots: Some(held.plots.clone()),
                captures: Some(held.captures.clone()),
            }));
        ensure!(
            !applied.changed && self.driver.state() == &held,
            "echoed snapshot changed the session"
        );
        Ok(())
    }

    /// The board is never empty and its turn field names the turn owner.
    fn check_position(&self) -> Result<()> {
        let state = self.driver.state();
        ensure!(
            has_pieces(&state.encoded_position),
            "empty board committed: {}",
            state.encoded_position
        );
        if !state.is_over() && self.driver.status().is_live() {
            ensure!(
                side_to_move(&state.encoded_position) == Some(state.turn_owner),
                "turn field of {} disagrees with owner {}",
                state.encoded_position,
                state.turn_owner
            );
        }
        Ok(())
    }
}

fn square(text: &str) -> Result<Square> {
    Square::parse(text).with_context(|| format!("bad square {text}"))
}
