use gambit_sync::constants::RECOVERY_FRESHNESS_MS;
use gambit_sync::{
    ConfigStore, ConnectionStatus, DriverConfig, EconomyConfig, Inbound, ManualClock,
    MemoryStorage, Outbound, PartialSessionState, PersistenceBridge, Phase, PlacementBoard,
    PlotState, Rejection, ResourceAction, SessionDriver, Side, Square,
};

type Driver = SessionDriver<PlacementBoard, MemoryStorage, ManualClock>;

fn sq(text: &str) -> Square {
    Square::parse(text).unwrap()
}

fn driver(storage: &MemoryStorage, clock: &ManualClock) -> Driver {
    SessionDriver::new(
        PlacementBoard::new(),
        PersistenceBridge::new(storage.clone(), clock.clone()),
        ConfigStore::new(EconomyConfig::default()),
        DriverConfig::default(),
        "ada",
    )
}

fn frames(driver: &mut Driver, lines: &[&str]) {
    for line in lines {
        driver.handle_frame(line).unwrap();
    }
}

/// Seat White in room `r1` with the opening position and White to act.
fn seated(storage: &MemoryStorage, clock: &ManualClock) -> Driver {
    let mut drv = driver(storage, clock);
    drv.connect();
    frames(
        &mut drv,
        &[
            r#"{"type":"sessionAssigned","payload":{"roomId":"r1","side":"white","isFirstPlayer":true}}"#,
            r#"{"type":"sessionSnapshot","payload":{"turnOwner":"white"}}"#,
        ],
    );
    drv.drain_outbound();
    drv
}

#[test]
fn queen_capture_costs_nine_and_hands_turn_over() {
    let storage = MemoryStorage::new();
    let clock = ManualClock::starting_at(50_000);
    let mut drv = seated(&storage, &clock);
    drv.end_resource_phase().unwrap();

    let out = drv.play_move(sq("d1"), sq("d7")).unwrap();
    assert_eq!(out.cost, 9);
    let state = drv.state();
    assert_eq!(state.balance(Side::White), 1);
    assert_eq!(state.capture_count(Side::White), 1);
    assert_eq!(state.turn_owner, Side::Black);
    assert!(drv.engine().pending().is_some());
}

#[test]
fn echoing_snapshot_changes_nothing() {
    let storage = MemoryStorage::new();
    let clock = ManualClock::starting_at(50_000);
    let mut drv = seated(&storage, &clock);
    drv.end_resource_phase().unwrap();
    drv.play_move(sq("d1"), sq("d7")).unwrap();
    let local = drv.state().clone();

    let applied = drv.handle_inbound(&Inbound::SessionSnapshot(PartialSessionState {
        turn_owner: Some(Side::Black),
        encoded_position: Some(local.encoded_position.clone()),
        economy: Some(local.economy.clone()),
        plots: Some(local.plots.clone()),
        captures: Some(local.captures.clone()),
    }));
    assert!(!applied.changed);
    assert_eq!(drv.state(), &local);
}

#[test]
fn reload_within_window_restores_before_server_speaks() {
    let storage = MemoryStorage::new();
    let clock = ManualClock::starting_at(50_000);
    let saved = {
        let mut drv = seated(&storage, &clock);
        drv.resource_action(
            &ResourceAction::Plant {
                crop: "corn".to_string(),
            },
            1,
        )
        .unwrap();
        drv.play_move(sq("g1"), sq("f3")).unwrap();
        drv.state().clone()
    };

    clock.advance(4 * 60 * 1000);
    let mut reloaded = driver(&storage, &clock);
    assert!(reloaded.connect());
    let state = reloaded.state();
    assert_eq!(state.room_id, "r1");
    assert_eq!(state.economy, saved.economy);
    assert_eq!(state.plots, saved.plots);
    assert_eq!(state.encoded_position, saved.encoded_position);
    assert_eq!(state.plots_for(Side::White)[1].state, PlotState::Growing);
    assert_eq!(
        reloaded.drain_outbound(),
        vec![Outbound::JoinRoom {
            username: "ada".to_string(),
            room_id: Some("r1".to_string()),
            is_reconnecting: true,
            previous_side: Some(Side::White),
        }]
    );
}

#[test]
fn reload_does_not_refund_the_turns_farm_action() {
    let storage = MemoryStorage::new();
    let clock = ManualClock::starting_at(50_000);
    let wheat = ResourceAction::Plant {
        crop: "wheat".to_string(),
    };
    {
        let mut drv = seated(&storage, &clock);
        drv.resource_action(&wheat, 0).unwrap();
        assert_eq!(drv.state().balance(Side::White), 8);
    }

    clock.advance(30_000);
    let mut reloaded = driver(&storage, &clock);
    assert!(reloaded.connect());
    frames(
        &mut reloaded,
        &[r#"{"type":"reconnectAccepted","payload":{"roomId":"r1","side":"white","turnOwner":"white"}}"#],
    );
    assert_eq!(reloaded.status(), ConnectionStatus::Active);
    assert_eq!(reloaded.state().phase, Phase::Tactical);
    assert!(reloaded.state().resource_action_used);
    assert_eq!(
        reloaded.resource_action(&wheat, 1),
        Err(Rejection::WrongPhase {
            expected: Phase::Resource,
            actual: Phase::Tactical,
        })
    );
    assert_eq!(reloaded.state().balance(Side::White), 8);
    assert!(reloaded.play_move(sq("e2"), sq("e4")).is_ok());
}

#[test]
fn stale_reload_joins_fresh() {
    let storage = MemoryStorage::new();
    let clock = ManualClock::starting_at(50_000);
    drop(seated(&storage, &clock));
    clock.advance(RECOVERY_FRESHNESS_MS + 60_000);
    let mut reloaded = driver(&storage, &clock);
    assert!(!reloaded.connect());
    assert!(storage.is_empty());
    assert!(matches!(
        reloaded.drain_outbound().as_slice(),
        [Outbound::JoinRoom {
            is_reconnecting: false,
            room_id: None,
            ..
        }]
    ));
}

#[test]
fn assignment_to_another_room_drops_recovery() {
    let storage = MemoryStorage::new();
    let clock = ManualClock::starting_at(50_000);
    drop(seated(&storage, &clock));
    let mut reloaded = driver(&storage, &clock);
    assert!(reloaded.connect());
    frames(
        &mut reloaded,
        &[r#"{"type":"sessionAssigned","payload":{"roomId":"r2","side":"black"}}"#],
    );
    assert_eq!(reloaded.state().room_id, "r2");
    assert_eq!(reloaded.state().local_side, Side::Black);
    assert_eq!(reloaded.recovery_snapshot().unwrap().room_id, "r2");
}

#[test]
fn reconnect_reply_overrides_offline_drift() {
    let storage = MemoryStorage::new();
    let clock = ManualClock::starting_at(50_000);
    let mut drv = seated(&storage, &clock);
    drv.end_resource_phase().unwrap();
    drv.play_move(sq("e2"), sq("e4")).unwrap();
    drv.handle_disconnect();
    clock.advance(1_000);
    assert!(drv.tick());

    frames(
        &mut drv,
        &[r#"{"type":"reconnectAccepted","payload":{
            "roomId":"r1","side":"white","turnOwner":"white",
            "encodedPosition":"rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            "economy":{"white":{"balance":10},"black":{"balance":10}}
        }}"#],
    );
    assert_eq!(drv.status(), ConnectionStatus::Active);
    let state = drv.state();
    assert_eq!(state.turn_owner, Side::White);
    assert_eq!(state.balance(Side::White), 10);
    assert!(state.encoded_position.contains("PPPPPPPP"));
    assert!(drv.engine().pending().is_none());
}

#[test]
fn scripted_exchange_replays_deterministically() {
    let script = [
        r#"{"type":"sessionAssigned","payload":{"roomId":"r7","side":"black"}}"#,
        r#"{"type":"sessionSnapshot","payload":{"turnOwner":"white"}}"#,
        r#"{"type":"opponentResourceAction","payload":{"type":"plant","plotIndex":0,"data":{"cropType":"wheat"}}}"#,
        r#"{"type":"opponentTacticalMove","payload":{"move":{"from":"e2","to":"e4","piece":"pawn"},"encodedPosition":"rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"}}"#,
        r#"{"type":"peerDisconnected"}"#,
        r#"{"type":"peerReconnected"}"#,
    ];
    let run = || {
        let storage = MemoryStorage::new();
        let clock = ManualClock::starting_at(1_000);
        let mut drv = driver(&storage, &clock);
        drv.connect();
        frames(&mut drv, &script);
        drv.state().clone()
    };
    let first = run();
    assert_eq!(first.digest(), run().digest());
    assert_eq!(first.turn_owner, Side::Black);
    assert_eq!(first.phase, Phase::Resource);
    assert_eq!(first.balance(Side::White), 10 - 2 - 1);
    assert_eq!(first.plots_for(Side::White)[0].state, PlotState::Growing);
    assert!(first.peer_connected);
}
