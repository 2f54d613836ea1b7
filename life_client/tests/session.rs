use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use life_client::{
    AcceptReason, EliminationReason, GameBackend, GamePhase, GameSession, LifecycleEvent, ObserverSet,
    SessionError, SessionEvent, SimulatedBackend, SyncDecision,
};
use life_core::{Cell, DenseGrid, GameConfig, GameState, LocalGame, ZoneInfo};
use tokio::sync::mpsc::Receiver;
use tokio::time::{sleep, timeout};

const SIZE: usize = 64;

/// Backend whose answers the test controls
#[derive(Default)]
struct ScriptedBackend {
    generation: AtomicU64,
    bases: Mutex<Vec<ZoneInfo>>,
    failing: AtomicBool,
}

impl ScriptedBackend {
    fn with_base(slot: u8) -> Self {
        let backend = Self::default();
        backend.bases.lock().unwrap().push(ZoneInfo { x: 8, y: 8, coins: 100, slot: slot - 1 });
        backend
    }
}

#[async_trait]
impl GameBackend for ScriptedBackend {
    async fn get_state(&self) -> Result<GameState, String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err("canister unreachable".to_string());
        }
        let grid = DenseGrid::new(SIZE);
        Ok(life_core::encode(&grid, self.generation.load(Ordering::SeqCst)))
    }

    async fn get_bases(&self) -> Result<Vec<ZoneInfo>, String> {
        Ok(self.bases.lock().unwrap().clone())
    }

    async fn place_cells(&self, _owner: u8, cells: Vec<(i32, i32)>) -> Result<u32, String> {
        Ok(cells.len() as u32)
    }
}

async fn wait_for(events: &mut Receiver<SessionEvent>, matches: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
    timeout(Duration::from_secs(60), async {
        loop {
            match events.recv().await {
                Some(event) if matches(&event) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

fn join_events(slot: u8) -> Vec<LifecycleEvent> {
    vec![
        LifecycleEvent::Initialized { authenticated: true },
        LifecycleEvent::RegionSelected("eu".to_string()),
        LifecycleEvent::ServerSelected("eu-1".to_string()),
        LifecycleEvent::JoinRequested { slot },
    ]
}

#[tokio::test(start_paused = true)]
async fn test_first_snapshot_is_forced_then_local_ticks_run() {
    let config = GameConfig::with_grid_size(SIZE);
    let mut game = LocalGame::new(config.clone());
    game.faucet(1).unwrap();
    game.join(1, 8, 8).unwrap();
    game.place(1, &[(9, 10), (10, 10), (11, 10)]).unwrap();
    let backend = Arc::new(SimulatedBackend::new(game).with_latency(Duration::from_millis(250)));

    let (session, mut events) = GameSession::start(backend, config, ObserverSet::new()).unwrap();

    // Read at 125ms (generation 1), compensated by 250ms worth of generations
    let first = wait_for(&mut events, |e| matches!(e, SessionEvent::Sync { .. })).await;
    assert_eq!(
        first,
        SessionEvent::Sync {
            decision: SyncDecision::Accepted(AcceptReason::Initial),
            local_generation: 3,
        }
    );

    sleep(Duration::from_secs(2)).await;
    let status = session.status().await.unwrap();
    assert!(status.display_generation >= 16, "{:?}", status);
    assert!(status.sync.latency.samples > 1);
    assert_eq!(status.sync.latency.max_ms, 250);
    assert_eq!(status.phase, GamePhase::Initializing);

    session.destroy().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_elimination_fires_once_after_base_disappears() {
    let backend = Arc::new(ScriptedBackend::with_base(1));
    let (session, mut events) =
        GameSession::start(backend.clone(), GameConfig::with_grid_size(SIZE), ObserverSet::new()).unwrap();

    for event in join_events(1) {
        session.lifecycle(event).await.unwrap();
    }
    session
        .lifecycle(LifecycleEvent::JoinConfirmed { slot: 1, generation: 0 })
        .await
        .unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::Phase(GamePhase::Playing(_)))).await;

    // Base gone, and the backend jumped ahead so the snapshot is accepted
    backend.bases.lock().unwrap().clear();
    backend.generation.store(400, Ordering::SeqCst);

    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::Eliminated(_))).await;
    let SessionEvent::Eliminated(stats) = event else { unreachable!() };
    assert_eq!(stats.reason, EliminationReason::GracePeriodExpired);
    assert!(stats.generations_survived >= 400);

    let status = session.status().await.unwrap();
    assert!(matches!(status.phase, GamePhase::Eliminated { .. }));

    // More accepted snapshots without the base: nothing further
    backend.generation.store(800, Ordering::SeqCst);
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Sync { decision: SyncDecision::Accepted(_), .. })
    })
    .await;
    sleep(Duration::from_secs(1)).await;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, SessionEvent::Eliminated(_)), "eliminated twice");
    }

    session.destroy().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_no_elimination_while_join_in_flight() {
    let backend = Arc::new(ScriptedBackend::default());
    let (session, mut events) =
        GameSession::start(backend.clone(), GameConfig::with_grid_size(SIZE), ObserverSet::new()).unwrap();

    for event in join_events(2) {
        session.lifecycle(event).await.unwrap();
    }

    for generation in [100, 200, 300] {
        backend.generation.store(generation, Ordering::SeqCst);
        sleep(Duration::from_secs(1)).await;
    }

    let status = session.status().await.unwrap();
    assert!(status.sync.accepted >= 3, "{:?}", status.sync);
    assert!(matches!(status.phase, GamePhase::JoiningSlot { pending_slot: Some(2), .. }));
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, SessionEvent::Eliminated(_)));
    }

    session.destroy().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sustained_divergence_surfaces_recoverable_error() {
    let backend = Arc::new(ScriptedBackend::with_base(1));
    let (session, mut events) =
        GameSession::start(backend.clone(), GameConfig::with_grid_size(SIZE), ObserverSet::new()).unwrap();

    wait_for(&mut events, |e| matches!(e, SessionEvent::Sync { .. })).await;
    backend.failing.store(true, Ordering::SeqCst);

    wait_for(&mut events, |e| matches!(e, SessionEvent::BackendError(_))).await;
    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::Diverged { .. })).await;
    let SessionEvent::Diverged { since_ms } = event else { unreachable!() };
    assert!(since_ms >= 15_000);

    let phase = wait_for(&mut events, |e| matches!(e, SessionEvent::Phase(_))).await;
    assert!(matches!(phase, SessionEvent::Phase(GamePhase::Error { recoverable: true, .. })));

    session.lifecycle(LifecycleEvent::Recover).await.unwrap();
    let status = session.status().await.unwrap();
    assert_eq!(status.phase, GamePhase::Initializing);

    session.destroy().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_placement_requires_playing() {
    let backend = Arc::new(ScriptedBackend::default());
    let (session, mut events) =
        GameSession::start(backend, GameConfig::with_grid_size(SIZE), ObserverSet::new()).unwrap();

    session.place_cells(vec![(1, 1)]).await.unwrap();
    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::PlacementRejected(_))).await;
    assert_eq!(event, SessionEvent::PlacementRejected("Not playing".to_string()));

    session.destroy().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_optimistic_placement_then_confirmation() {
    let backend = Arc::new(ScriptedBackend::with_base(1));
    let (session, mut events) =
        GameSession::start(backend, GameConfig::with_grid_size(SIZE), ObserverSet::new()).unwrap();

    for event in join_events(1) {
        session.lifecycle(event).await.unwrap();
    }
    session
        .lifecycle(LifecycleEvent::JoinConfirmed { slot: 1, generation: 0 })
        .await
        .unwrap();
    session.place_cells(vec![(9, 9), (10, 9), (11, 9)]).await.unwrap();

    let event = wait_for(&mut events, |e| matches!(e, SessionEvent::PlacementConfirmed { .. })).await;
    assert_eq!(event, SessionEvent::PlacementConfirmed { placed: 3 });

    session.destroy().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_destroy_stops_the_task() {
    let backend = Arc::new(ScriptedBackend::default());
    let (session, mut events) =
        GameSession::start(backend, GameConfig::with_grid_size(SIZE), ObserverSet::new()).unwrap();

    session.destroy().await.unwrap();

    let mut saw_stopped = false;
    while let Some(event) = events.recv().await {
        saw_stopped |= event == SessionEvent::Stopped;
    }
    assert!(saw_stopped);
}

#[tokio::test]
async fn test_invalid_config_is_rejected_up_front() {
    let backend = Arc::new(ScriptedBackend::default());
    let mut config = GameConfig::with_grid_size(SIZE);
    config.tick_interval_ms = 0;

    let result = GameSession::start(backend, config, ObserverSet::new());
    assert!(matches!(result, Err(SessionError::Config(_))));
}

#[test]
fn test_dense_grid_fixture_encodes_alive_cells() {
    let mut grid = DenseGrid::new(SIZE);
    grid.set(1, 0, Cell::new(1, true));
    let state = life_core::encode(&grid, 5);
    assert_eq!(state.alive_bitmap[0], 0b10);
}
