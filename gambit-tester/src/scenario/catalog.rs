use anyhow::{Context, ensure};
use gambit_sync::constants::INITIAL_POSITION;
use gambit_sync::position::{piece_count, same_placement, side_to_move};
use gambit_sync::{
    ConnectionStatus, EndReason, Outbound, Phase, PlotState, Rejection, ResourceAction, Side,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde_json::{Value, json};

use super::Scenario;
use crate::harness::{LocalAction, Step};

const ROOM: &str = "qa-room";
const MIDGAME_W: &str = "r3k2r/ppp2ppp/2n5/3qp3/3P4/2N5/PPP2PPP/R2QK2R w KQkq - 0 9";
const KING_AND_ROOK: &str = "4k3/8/8/8/8/8/8/4K2R w - - 0 1";
const EMPTY_BOARD: &str = "8/8/8/8/8/8/8/8 w - - 0 1";
const RECONNECT_WINDOW_MS: u64 = 5 * 60 * 1000;

pub fn catalog_scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            key: "smoke-turn",
            description: "Join, farm, move and mirror one opponent turn",
            smoke: true,
            script: smoke_turn,
        },
        Scenario {
            key: "queen-capture",
            description: "Queen capture debits nine and survives an echoed snapshot",
            smoke: true,
            script: queen_capture,
        },
        Scenario {
            key: "optimistic-superseded",
            description: "Server keeps the turn after a local move, which is rolled back",
            smoke: false,
            script: optimistic_superseded,
        },
        Scenario {
            key: "turn-repair",
            description: "Snapshot with a stale turn field is repaired, not reset",
            smoke: true,
            script: turn_repair,
        },
        Scenario {
            key: "empty-board",
            description: "Empty or garbled positions never reach the session",
            smoke: false,
            script: empty_board,
        },
        Scenario {
            key: "farm-unlock",
            description: "Captures earn a plot; an empty turn skips straight to the board",
            smoke: false,
            script: farm_unlock,
        },
        Scenario {
            key: "reload-restore",
            description: "Reload inside the window restores the session and resumes",
            smoke: true,
            script: reload_restore,
        },
        Scenario {
            key: "reload-farm-spent",
            description: "A reload mid-turn does not hand back the spent farm action",
            smoke: false,
            script: reload_farm_spent,
        },
        Scenario {
            key: "stale-reload",
            description: "Reload after the window joins a fresh session",
            smoke: false,
            script: stale_reload,
        },
        Scenario {
            key: "foreign-room",
            description: "Assignment to another room drops the recovery record",
            smoke: false,
            script: foreign_room,
        },
        Scenario {
            key: "reconnect-backoff",
            description: "Dropped socket rejoins after a jittered delay",
            smoke: true,
            script: reconnect_backoff,
        },
        Scenario {
            key: "reconnect-expiry",
            description: "Window runs out while offline; user retries fresh",
            smoke: false,
            script: reconnect_expiry,
        },
        Scenario {
            key: "reconnect-exhausted",
            description: "Every attempt fails; session goes read-only and keeps its record",
            smoke: false,
            script: reconnect_exhausted,
        },
        Scenario {
            key: "reconnect-cancel",
            description: "User stops reconnecting, then retries with the saved record",
            smoke: false,
            script: reconnect_cancel,
        },
        Scenario {
            key: "room-unavailable",
            description: "Server forgot the room; client rejoins from scratch",
            smoke: false,
            script: room_unavailable,
        },
        Scenario {
            key: "king-capture",
            description: "Capturing the king ends the session and clears recovery",
            smoke: false,
            script: king_capture,
        },
        Scenario {
            key: "resignation",
            description: "Server-announced end is absorbing",
            smoke: false,
            script: resignation,
        },
        Scenario {
            key: "config-update",
            description: "New economy table prices the next move",
            smoke: false,
            script: config_update,
        },
        Scenario {
            key: "peer-presence",
            description: "Opponent drops and returns without touching the seat",
            smoke: false,
            script: peer_presence,
        },
        Scenario {
            key: "snapshot-sweep",
            description: "Seeded barrage of partial snapshots keeps board and turn coherent",
            smoke: false,
            script: snapshot_sweep,
        },
    ]
}

// Frames ------------------------------------------------------------------

fn assigned(room: &str, side: &str) -> Step {
    Step::frame(&json!({
        "type": "sessionAssigned",
        "payload": { "roomId": room, "side": side, "isFirstPlayer": side == "white" }
    }))
}

fn snapshot(payload: &Value) -> Step {
    Step::frame(&json!({ "type": "sessionSnapshot", "payload": payload }))
}

fn opponent_move(from: &str, to: &str, piece: &str, captured: Option<&str>, fen: &str) -> Step {
    let mut mv = json!({ "from": from, "to": to, "piece": piece });
    if let Some(captured) = captured {
        mv["captured"] = json!(captured);
    }
    Step::frame(&json!({
        "type": "opponentTacticalMove",
        "payload": { "move": mv, "encodedPosition": fen }
    }))
}

fn reconnect_accepted(side: &str, turn_owner: &str) -> Step {
    Step::frame(&json!({
        "type": "reconnectAccepted",
        "payload": { "roomId": ROOM, "side": side, "turnOwner": turn_owner }
    }))
}

fn play(from: &'static str, to: &'static str) -> Step {
    Step::Local(LocalAction::Play(from, to))
}

fn farm(action: ResourceAction, plot: usize) -> Step {
    Step::Local(LocalAction::Farm(action, plot))
}

fn plant(crop: &str) -> ResourceAction {
    ResourceAction::Plant {
        crop: crop.to_string(),
    }
}

/// Join `ROOM` as `side` with White to act and the session live.
fn seated(side: &str) -> Vec<Step> {
    vec![
        Step::Connect,
        assigned(ROOM, side),
        snapshot(&json!({ "turnOwner": "white" })),
        Step::ExpectStatus(ConnectionStatus::Active),
    ]
}

fn fresh_join(msg: &Outbound) -> bool {
    matches!(
        msg,
        Outbound::JoinRoom {
            is_reconnecting: false,
            room_id: None,
            ..
        }
    )
}

fn resume_join(msg: &Outbound) -> bool {
    matches!(
        msg,
        Outbound::JoinRoom {
            is_reconnecting: true,
            room_id: Some(room),
            previous_side: Some(Side::White),
            ..
        } if room == ROOM
    )
}

// Scripts -----------------------------------------------------------------

fn smoke_turn(_seed: u64) -> Vec<Step> {
    let mut steps = seated("white");
    steps.extend([
        Step::ExpectTurn(Side::White, Phase::Resource),
        farm(plant("wheat"), 0),
        Step::ExpectBalance(Side::White, 8),
        Step::ExpectTurn(Side::White, Phase::Tactical),
        play("e2", "e4"),
        Step::ExpectOwner(Side::Black),
        Step::ExpectBalance(Side::White, 7),
        Step::ExpectLastSent(|msg| matches!(msg, Outbound::EndTurn { .. })),
        Step::frame(&json!({
            "type": "opponentResourceAction",
            "payload": { "type": "plant", "plotIndex": 0, "data": { "cropType": "corn" } }
        })),
        Step::ExpectBalance(Side::Black, 7),
        opponent_move(
            "e7",
            "e5",
            "pawn",
            None,
            "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2",
        ),
        Step::ExpectTurn(Side::White, Phase::Resource),
        Step::ExpectBalance(Side::Black, 6),
        Step::Check("wheat grew one turn", |h| {
            let plot = &h.driver().state().plots_for(Side::White)[0];
            ensure!(
                plot.state == PlotState::Growing && plot.turns_remaining == 1,
                "wheat plot is {plot:?}"
            );
            Ok(())
        }),
    ]);
    steps
}

fn queen_capture(_seed: u64) -> Vec<Step> {
    let mut steps = seated("white");
    steps.extend([
        Step::Local(LocalAction::SkipFarm),
        play("d1", "d7"),
        Step::ExpectBalance(Side::White, 1),
        Step::ExpectOwner(Side::Black),
        Step::Check("capture counted and plot offered", |h| {
            let state = h.driver().state();
            ensure!(state.capture_count(Side::White) == 1, "captures not counted");
            ensure!(
                state.plots_for(Side::White)[2].state == PlotState::Unlockable,
                "third plot not offered"
            );
            ensure!(h.driver().engine().pending().is_some(), "no pending move");
            Ok(())
        }),
        Step::Echo,
        Step::Check("echo confirmed the move", |h| {
            ensure!(h.driver().engine().pending().is_none(), "move still pending");
            Ok(())
        }),
    ]);
    steps
}

fn optimistic_superseded(_seed: u64) -> Vec<Step> {
    let mut steps = seated("white");
    steps.extend([
        Step::Local(LocalAction::SkipFarm),
        play("e2", "e4"),
        Step::ExpectOwner(Side::Black),
        Step::ExpectBalance(Side::White, 9),
        snapshot(&json!({ "turnOwner": "white" })),
        Step::ExpectTurn(Side::White, Phase::Tactical),
        Step::ExpectBalance(Side::White, 10),
        Step::Check("move rolled back", |h| {
            ensure!(h.driver().engine().pending().is_none(), "move still pending");
            let encoded = &h.driver().state().encoded_position;
            ensure!(encoded == INITIAL_POSITION, "board kept the move: {encoded}");
            Ok(())
        }),
        play("d2", "d4"),
        Step::ExpectOwner(Side::Black),
    ]);
    steps
}

fn turn_repair(_seed: u64) -> Vec<Step> {
    vec![
        Step::Connect,
        assigned(ROOM, "black"),
        snapshot(&json!({ "turnOwner": "black", "encodedPosition": MIDGAME_W })),
        Step::ExpectTurn(Side::Black, Phase::Resource),
        Step::Check("pieces kept, turn rewritten", |h| {
            let encoded = &h.driver().state().encoded_position;
            ensure!(same_placement(encoded, MIDGAME_W), "placement changed: {encoded}");
            ensure!(side_to_move(encoded) == Some(Side::Black), "turn not rewritten");
            ensure!(encoded != INITIAL_POSITION, "reset to the opening");
            Ok(())
        }),
    ]
}

fn empty_board(_seed: u64) -> Vec<Step> {
    let mut steps = seated("white");
    steps.extend([
        snapshot(&json!({ "encodedPosition": MIDGAME_W })),
        snapshot(&json!({ "encodedPosition": EMPTY_BOARD })),
        Step::Check("last known-good position kept", |h| {
            let encoded = &h.driver().state().encoded_position;
            ensure!(encoded == MIDGAME_W, "unexpected board {encoded}");
            Ok(())
        }),
        snapshot(&json!({ "encodedPosition": "not a board", "turnOwner": "black" })),
        Step::ExpectOwner(Side::Black),
    ]);
    steps
}

fn farm_unlock(_seed: u64) -> Vec<Step> {
    let mut steps = seated("white");
    steps.extend([
        Step::Local(LocalAction::SkipFarm),
        play("d1", "d7"),
        Step::ExpectBalance(Side::White, 1),
        Step::Refused(
            LocalAction::Farm(ResourceAction::Unlock, 2),
            Rejection::NotYourTurn,
        ),
        opponent_move(
            "e8",
            "d7",
            "king",
            Some("queen"),
            "rnbq1bnr/pppkpppp/8/8/8/8/PPPPPPPP/RNB1KBNR w - - 0 2",
        ),
        // Nothing affordable: the turn opens on the board.
        Step::ExpectTurn(Side::White, Phase::Tactical),
        Step::Check("black capture counted", |h| {
            ensure!(h.driver().state().capture_count(Side::Black) == 1, "capture lost");
            Ok(())
        }),
        snapshot(&json!({ "economy": { "white": { "balance": 12 } } })),
        Step::ExpectBalance(Side::White, 12),
        Step::Refused(
            LocalAction::Farm(ResourceAction::Unlock, 2),
            Rejection::WrongPhase {
                expected: Phase::Resource,
                actual: Phase::Tactical,
            },
        ),
        play("a2", "a3"),
        Step::ExpectBalance(Side::White, 11),
        opponent_move(
            "h7",
            "h6",
            "pawn",
            None,
            "rnbq1bnr/pppkppp1/7p/8/8/P7/1PPPPPPP/RNB1KBNR w - - 0 3",
        ),
        Step::ExpectTurn(Side::White, Phase::Resource),
        Step::ExpectBalance(Side::Black, 9),
        farm(ResourceAction::Unlock, 2),
        Step::ExpectBalance(Side::White, 7),
        Step::Check("plot opened", |h| {
            let state = h.driver().state().plots_for(Side::White)[2].state;
            ensure!(state == PlotState::Empty, "plot is {state}");
            Ok(())
        }),
        Step::Refused(
            LocalAction::Farm(plant("wheat"), 2),
            Rejection::WrongPhase {
                expected: Phase::Resource,
                actual: Phase::Tactical,
            },
        ),
    ]);
    steps
}

fn reload_restore(_seed: u64) -> Vec<Step> {
    let mut steps = seated("white");
    steps.extend([
        farm(plant("corn"), 1),
        play("g1", "f3"),
        Step::Advance(4 * 60 * 1000),
        Step::Reload,
        Step::Connect,
        Step::ExpectStatus(ConnectionStatus::Connecting),
        Step::Check("session laid back before the server speaks", |h| {
            let state = h.driver().state();
            ensure!(state.room_id == ROOM, "room {}", state.room_id);
            ensure!(state.balance(Side::White) == 4, "balance {}", state.balance(Side::White));
            ensure!(
                state.plots_for(Side::White)[1].state == PlotState::Growing,
                "corn plot lost"
            );
            ensure!(state.encoded_position.contains("5N2"), "knight move lost");
            Ok(())
        }),
        Step::ExpectLastSent(resume_join),
        reconnect_accepted("white", "black"),
        Step::ExpectStatus(ConnectionStatus::Active),
        Step::ExpectBalance(Side::White, 4),
    ]);
    steps
}

fn reload_farm_spent(_seed: u64) -> Vec<Step> {
    let mut steps = seated("white");
    steps.extend([
        farm(plant("wheat"), 0),
        Step::ExpectTurn(Side::White, Phase::Tactical),
        Step::Advance(30_000),
        Step::Reload,
        Step::Connect,
        Step::ExpectLastSent(resume_join),
        reconnect_accepted("white", "white"),
        Step::ExpectTurn(Side::White, Phase::Tactical),
        Step::Refused(
            LocalAction::Farm(plant("wheat"), 1),
            Rejection::WrongPhase {
                expected: Phase::Resource,
                actual: Phase::Tactical,
            },
        ),
        Step::ExpectBalance(Side::White, 8),
        play("e2", "e4"),
        Step::ExpectOwner(Side::Black),
    ]);
    steps
}

fn stale_reload(_seed: u64) -> Vec<Step> {
    let mut steps = seated("white");
    steps.extend([
        Step::Local(LocalAction::SkipFarm),
        play("e2", "e4"),
        Step::Advance(RECONNECT_WINDOW_MS + 1_000),
        Step::Reload,
        Step::Connect,
        Step::ExpectLastSent(fresh_join),
        Step::Check("stale record removed", |h| {
            ensure!(h.storage().is_empty(), "record still stored");
            ensure!(h.driver().state().room_id.is_empty(), "stale room restored");
            Ok(())
        }),
    ]);
    steps
}

fn foreign_room(_seed: u64) -> Vec<Step> {
    let mut steps = seated("white");
    steps.extend([
        Step::Local(LocalAction::SkipFarm),
        play("e2", "e4"),
        Step::Reload,
        Step::Connect,
        assigned("qa-room-2", "black"),
        Step::ExpectStatus(ConnectionStatus::Joined),
        Step::Check("record now describes the new room", |h| {
            let state = h.driver().state();
            ensure!(state.room_id == "qa-room-2" && state.local_side == Side::Black);
            ensure!(state.encoded_position == INITIAL_POSITION, "old board kept");
            let record = h.driver().recovery_snapshot().context("no record")?;
            ensure!(record.room_id == "qa-room-2", "record for {}", record.room_id);
            Ok(())
        }),
    ]);
    steps
}

fn reconnect_backoff(_seed: u64) -> Vec<Step> {
    let mut steps = seated("white");
    steps.extend([
        Step::Disconnect,
        Step::ExpectStatus(ConnectionStatus::Disconnected),
        Step::Refused(LocalAction::SkipFarm, Rejection::SessionUnavailable),
        Step::Advance(100),
        Step::Tick,
        Step::ExpectStatus(ConnectionStatus::Disconnected),
        Step::Advance(900),
        Step::Tick,
        Step::ExpectStatus(ConnectionStatus::Connecting),
        Step::ExpectLastSent(resume_join),
        reconnect_accepted("white", "white"),
        Step::ExpectStatus(ConnectionStatus::Active),
        Step::Check("backoff finished", |h| {
            ensure!(!h.driver().reconnector().is_active(), "still reconnecting");
            Ok(())
        }),
        Step::Local(LocalAction::SkipFarm),
    ]);
    steps
}

fn reconnect_expiry(_seed: u64) -> Vec<Step> {
    let mut steps = seated("white");
    steps.extend([
        Step::Disconnect,
        Step::Advance(RECONNECT_WINDOW_MS + 1_000),
        Step::Tick,
        Step::ExpectStatus(ConnectionStatus::Degraded),
        Step::Check("expired record dropped", |h| {
            ensure!(h.storage().is_empty(), "record still stored");
            Ok(())
        }),
        Step::Refused(LocalAction::SkipFarm, Rejection::SessionUnavailable),
        Step::Retry,
        Step::ExpectStatus(ConnectionStatus::Connecting),
        Step::ExpectLastSent(fresh_join),
    ]);
    steps
}

fn reconnect_exhausted(_seed: u64) -> Vec<Step> {
    let mut steps = seated("white");
    steps.push(Step::Disconnect);
    for _ in 0..6 {
        steps.extend([
            Step::Advance(10_000),
            Step::Tick,
            Step::ExpectStatus(ConnectionStatus::Connecting),
            Step::Disconnect,
        ]);
    }
    steps.extend([
        Step::Advance(10_000),
        Step::Tick,
        Step::ExpectStatus(ConnectionStatus::Degraded),
        Step::Check("record kept for a manual retry", |h| {
            ensure!(h.driver().recovery_snapshot().is_some(), "record dropped");
            Ok(())
        }),
        Step::Retry,
        Step::ExpectLastSent(resume_join),
    ]);
    steps
}

fn reconnect_cancel(_seed: u64) -> Vec<Step> {
    let mut steps = seated("white");
    steps.extend([
        Step::Disconnect,
        Step::CancelReconnect,
        Step::ExpectStatus(ConnectionStatus::Degraded),
        Step::Advance(60_000),
        Step::Tick,
        Step::ExpectStatus(ConnectionStatus::Degraded),
        Step::Check("record kept", |h| {
            ensure!(!h.storage().is_empty(), "record dropped");
            Ok(())
        }),
        Step::Retry,
        Step::ExpectStatus(ConnectionStatus::Connecting),
        Step::ExpectLastSent(resume_join),
        reconnect_accepted("white", "white"),
        Step::ExpectTurn(Side::White, Phase::Resource),
    ]);
    steps
}

fn room_unavailable(_seed: u64) -> Vec<Step> {
    let mut steps = seated("white");
    steps.extend([
        Step::frame(&json!({ "type": "roomUnavailable", "payload": { "roomId": ROOM } })),
        Step::ExpectStatus(ConnectionStatus::Connecting),
        Step::ExpectLastSent(fresh_join),
        Step::Check("session cleared", |h| {
            ensure!(h.storage().is_empty(), "record still stored");
            ensure!(h.driver().state().room_id.is_empty(), "room kept");
            Ok(())
        }),
    ]);
    steps
}

fn king_capture(_seed: u64) -> Vec<Step> {
    vec![
        Step::Connect,
        assigned(ROOM, "white"),
        snapshot(&json!({ "turnOwner": "white", "encodedPosition": KING_AND_ROOK })),
        Step::Local(LocalAction::SkipFarm),
        play("h1", "e8"),
        Step::ExpectStatus(ConnectionStatus::Ended),
        Step::ExpectLastSent(|msg| {
            matches!(
                msg,
                Outbound::SessionOver {
                    winner: Some(Side::White),
                    reason: EndReason::Checkmate,
                }
            )
        }),
        Step::Check("record cleared", |h| {
            ensure!(h.storage().is_empty(), "record still stored");
            Ok(())
        }),
        Step::Refused(LocalAction::SkipFarm, Rejection::SessionOver),
        snapshot(&json!({ "turnOwner": "black", "encodedPosition": INITIAL_POSITION })),
        Step::Check("ended session ignores snapshots", |h| {
            let state = h.driver().state();
            ensure!(state.winner == Some(Side::White), "winner changed");
            ensure!(piece_count(&state.encoded_position) == 2, "board changed");
            Ok(())
        }),
    ]
}

fn resignation(_seed: u64) -> Vec<Step> {
    let mut steps = seated("black");
    steps.extend([
        Step::frame(&json!({
            "type": "sessionEnded",
            "payload": { "winner": "black", "reason": "resignation" }
        })),
        Step::ExpectStatus(ConnectionStatus::Ended),
        Step::Disconnect,
        Step::Tick,
        Step::ExpectStatus(ConnectionStatus::Ended),
        Step::Check("verdict recorded", |h| {
            let state = h.driver().state();
            ensure!(state.end_reason == Some(EndReason::Resignation));
            ensure!(state.winner == Some(Side::Black));
            ensure!(h.storage().is_empty(), "record still stored");
            Ok(())
        }),
    ]);
    steps
}

fn config_update(_seed: u64) -> Vec<Step> {
    let mut steps = seated("white");
    steps.extend([
        Step::frame(&json!({
            "type": "configUpdated",
            "payload": { "config": { "version": "season-2", "moveCosts": { "pawn": 4 } } }
        })),
        Step::Check("new table active", |h| {
            let version = &h.driver().state().config_version.0;
            ensure!(version == "season-2", "active table {version}");
            Ok(())
        }),
        Step::ExpectBalance(Side::White, 10),
        Step::Local(LocalAction::SkipFarm),
        play("e2", "e4"),
        Step::ExpectBalance(Side::White, 6),
    ]);
    steps
}

fn peer_presence(_seed: u64) -> Vec<Step> {
    let mut steps = seated("white");
    steps.extend([
        Step::frame(&json!({ "type": "peerDisconnected" })),
        Step::ExpectStatus(ConnectionStatus::Active),
        Step::Check("peer marked away", |h| {
            ensure!(!h.driver().state().peer_connected, "peer still present");
            Ok(())
        }),
        Step::Local(LocalAction::SkipFarm),
        Step::frame(&json!({ "type": "peerReconnected" })),
        Step::Check("peer back", |h| {
            ensure!(h.driver().state().peer_connected, "peer still away");
            Ok(())
        }),
        Step::ExpectTurn(Side::White, Phase::Tactical),
    ]);
    steps
}

fn snapshot_sweep(seed: u64) -> Vec<Step> {
    const CANDIDATES: [&str; 7] = [
        INITIAL_POSITION,
        MIDGAME_W,
        "r3k2r/ppp2ppp/2n5/3qp3/3P4/2N5/PPP2PPP/R2QK2R b KQkq - 0 9",
        KING_AND_ROOK,
        EMPTY_BOARD,
        "",
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR x KQkq - 0 1",
    ];
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let local = if rng.gen_bool(0.5) { "white" } else { "black" };
    let mut steps = seated(local);
    for _ in 0..40 {
        let (owner, side) = if rng.gen_bool(0.5) {
            ("white", Side::White)
        } else {
            ("black", Side::Black)
        };
        let mut payload = json!({ "turnOwner": owner });
        if rng.gen_bool(0.8) {
            payload["encodedPosition"] = json!(CANDIDATES[rng.gen_range(0..CANDIDATES.len())]);
        }
        if rng.gen_bool(0.3) {
            let mut economy = serde_json::Map::new();
            economy.insert(
                owner.to_string(),
                json!({ "balance": rng.gen_range(0..20_u32) }),
            );
            payload["economy"] = Value::Object(economy);
        }
        steps.push(snapshot(&payload));
        steps.push(Step::ExpectOwner(side));
        if rng.gen_bool(0.2) {
            steps.push(Step::Echo);
        }
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::Harness;

    fn replay(script: fn(u64) -> Vec<Step>, seed: u64) {
        let mut harness = Harness::new(seed);
        for (index, step) in script(seed).iter().enumerate() {
            if let Err(err) = harness.apply(step) {
                panic!("step {index} ({}) failed: {err:#}", step.label());
            }
        }
    }

    #[test]
    fn every_scenario_passes_on_default_seed() {
        for scenario in catalog_scenarios() {
            replay(scenario.script, 1337);
        }
    }

    #[test]
    fn sweep_varies_with_seed() {
        let a: Vec<String> = snapshot_sweep(1).iter().map(Step::label).collect();
        let b: Vec<String> = snapshot_sweep(2).iter().map(Step::label).collect();
        assert!(a.len() > 40 && b.len() > 40);
        let frames_a: Vec<_> = snapshot_sweep(1)
            .into_iter()
            .filter_map(|s| match s {
                Step::Frame(text) => Some(text),
                _ => None,
            })
            .collect();
        let frames_b: Vec<_> = snapshot_sweep(2)
            .into_iter()
            .filter_map(|s| match s {
                Step::Frame(text) => Some(text),
                _ => None,
            })
            .collect();
        assert_ne!(frames_a, frames_b);
    }

    #[test]
    fn backoff_holds_across_seeds() {
        for seed in [0, 7, 42, 99, 1337] {
            replay(reconnect_backoff, seed);
            replay(reconnect_exhausted, seed);
        }
    }
}
