//! One client session: a single task that owns the engine and the lifecycle
//! machine and multiplexes the local tick, the snapshot poll, in-flight
//! backend calls and commands from the handle.
//!
//! Fetches run in a `JoinSet`, never inline, so a slow backend cannot stall
//! local ticking. Results are applied in completion order; an old fetch that
//! finishes after a newer one is rejected by the engine's staleness checks.

use crate::backend::GameBackend;
use crate::engine::{ReconciliationEngine, SyncDecision, SyncHealth, SyncState};
use crate::error::{Result, SessionError};
use crate::lifecycle::{EliminationStats, GamePhase, LifecycleEvent, LifecycleMachine};
use crate::observer::ObserverSet;
use life_core::{ContactEvent, GameConfig, Snapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 256;
/// Polls beyond this many outstanding fetches are skipped
const MAX_IN_FLIGHT_FETCHES: usize = 4;

// =============================================================================
// EVENTS & COMMANDS
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Phase(GamePhase),
    Sync { decision: SyncDecision, local_generation: u64 },
    Contact(ContactEvent),
    Eliminated(EliminationStats),
    PlacementConfirmed { placed: u32 },
    PlacementRejected(String),
    BackendError(String),
    Diverged { since_ms: u64 },
    Stopped,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionStatus {
    pub phase: GamePhase,
    pub sync: SyncState,
    pub display_generation: u64,
    pub in_flight_fetches: usize,
}

enum SessionCommand {
    PlaceCells(Vec<(i32, i32)>),
    Lifecycle(LifecycleEvent),
    Freeze,
    Resume,
    Status(oneshot::Sender<SessionStatus>),
    Shutdown,
}

struct Fetched {
    snapshot: Snapshot,
    latency_ms: u64,
}

// =============================================================================
// HANDLE
// =============================================================================

/// Owner of a running session. Dropping it aborts the task; `destroy` shuts
/// it down cleanly.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::SessionClosed)
    }

    /// Apply locally right away, then submit to the backend
    pub async fn place_cells(&self, cells: Vec<(i32, i32)>) -> Result<()> {
        self.send(SessionCommand::PlaceCells(cells)).await
    }

    pub async fn lifecycle(&self, event: LifecycleEvent) -> Result<()> {
        self.send(SessionCommand::Lifecycle(event)).await
    }

    pub async fn freeze(&self) -> Result<()> {
        self.send(SessionCommand::Freeze).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send(SessionCommand::Resume).await
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Status(tx)).await?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Stop both intervals, abort in-flight backend calls and wait for the
    /// session task to finish.
    pub async fn destroy(mut self) -> Result<()> {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!("session task panicked: {e}");
                }
            }
        }
        Ok(())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        // No executor to await on here; abort instead
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("closed", &self.is_closed())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

// =============================================================================
// SESSION TASK
// =============================================================================

pub struct GameSession {
    backend: Arc<dyn GameBackend>,
    config: GameConfig,
    engine: ReconciliationEngine,
    lifecycle: LifecycleMachine,
    events: mpsc::Sender<SessionEvent>,
    fetches: JoinSet<std::result::Result<Fetched, String>>,
    placements: JoinSet<std::result::Result<u32, String>>,
    started: Instant,
    diverged: bool,
}

impl GameSession {
    /// Validate `config` and spawn the session task. Must be called from
    /// within a tokio runtime.
    pub fn start(
        backend: Arc<dyn GameBackend>,
        config: GameConfig,
        observers: ObserverSet,
    ) -> Result<(SessionHandle, mpsc::Receiver<SessionEvent>)> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let session = GameSession {
            backend,
            engine: ReconciliationEngine::with_observers(config.clone(), observers),
            config,
            lifecycle: LifecycleMachine::new(),
            events: event_tx,
            fetches: JoinSet::new(),
            placements: JoinSet::new(),
            started: Instant::now(),
            diverged: false,
        };

        let task = tokio::spawn(session.run(command_rx));
        Ok((
            SessionHandle {
                commands: command_tx,
                task: Some(task),
            },
            event_rx,
        ))
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        info!(
            grid_size = self.config.grid_size,
            tick_ms = self.config.tick_interval_ms,
            poll_ms = self.config.poll_interval_ms,
            "session started"
        );

        let mut tick = interval(Duration::from_millis(self.config.tick_interval_ms));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut poll = interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => self.on_tick(),

                _ = poll.tick() => self.spawn_fetch(),

                Some(joined) = self.fetches.join_next() => self.on_fetch(joined),

                Some(joined) = self.placements.join_next() => self.on_placement(joined),

                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
            }
        }

        self.fetches.abort_all();
        self.placements.abort_all();
        self.emit(SessionEvent::Stopped);
        info!(
            generation = self.engine.display_generation(),
            accepted = self.engine.sync_state().accepted,
            rejected = self.engine.sync_state().rejected,
            "session stopped"
        );
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Fire-and-forget: a full or closed event channel never blocks the loop
    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("session event dropped: {e}");
        }
    }

    fn apply_lifecycle(&mut self, event: LifecycleEvent) -> bool {
        let changed = self.lifecycle.apply(event);
        if changed {
            self.emit(SessionEvent::Phase(self.lifecycle.phase().clone()));
        }
        changed
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    fn on_tick(&mut self) {
        if self.engine.tick() {
            for contact in self.engine.take_contacts() {
                self.emit(SessionEvent::Contact(contact));
            }
        }

        let now = self.now_ms();
        if let SyncHealth::Diverged { since_ms } = self.engine.health(now) {
            if !self.diverged {
                self.diverged = true;
                warn!(since_ms, "no accepted snapshot, client has diverged");
                self.emit(SessionEvent::Diverged { since_ms });
                self.apply_lifecycle(LifecycleEvent::Failed {
                    message: format!("Lost sync with the game server for {}s", since_ms / 1000),
                    recoverable: true,
                });
            }
        }
    }

    // -------------------------------------------------------------------------
    // Poll
    // -------------------------------------------------------------------------

    fn spawn_fetch(&mut self) {
        if self.fetches.len() >= MAX_IN_FLIGHT_FETCHES {
            debug!(in_flight = self.fetches.len(), "poll skipped, backend is slow");
            return;
        }

        let backend = Arc::clone(&self.backend);
        self.fetches.spawn(async move {
            let started = Instant::now();
            let (state, bases) = tokio::join!(backend.get_state(), backend.get_bases());
            let latency_ms = started.elapsed().as_millis() as u64;
            Ok(Fetched {
                snapshot: Snapshot::from_wire(state?, &bases?),
                latency_ms,
            })
        });
    }

    fn on_fetch(&mut self, joined: std::result::Result<std::result::Result<Fetched, String>, JoinError>) {
        let fetched = match joined {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(message)) => {
                warn!("snapshot fetch failed: {message}");
                self.emit(SessionEvent::BackendError(message));
                return;
            }
            Err(e) => {
                if !e.is_cancelled() {
                    warn!("snapshot fetch task failed: {e}");
                }
                return;
            }
        };

        let now = self.now_ms();
        let decision = if self.engine.sync_state().accepted == 0 {
            self.engine.force_sync(&fetched.snapshot, fetched.latency_ms, now)
        } else {
            self.engine.receive_snapshot(&fetched.snapshot, fetched.latency_ms, now)
        };

        self.emit(SessionEvent::Sync {
            decision,
            local_generation: self.engine.sync_state().local_generation,
        });

        if decision.is_accepted() {
            self.diverged = false;
            self.after_accepted();
        }
    }

    /// Zones only change with an accepted snapshot, so this is where a lost
    /// base shows up.
    fn after_accepted(&mut self) {
        let Some(slot) = self.lifecycle.player().map(|p| p.slot) else {
            return;
        };

        let grid = self.engine.grid();
        let territory = grid.territory_count(slot);
        let alive = grid.alive_count_for(slot);
        self.lifecycle.record_territory(territory);

        let generation = self.engine.sync_state().local_generation;
        if let Some(stats) = self.lifecycle.check_elimination(self.engine.zones(), generation, alive) {
            self.engine.observers_mut().elimination(&stats);
            self.emit(SessionEvent::Eliminated(stats));
            self.emit(SessionEvent::Phase(self.lifecycle.phase().clone()));
        }
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::PlaceCells(cells) => self.place_cells(cells),
            SessionCommand::Lifecycle(event) => {
                let freeze = match event {
                    LifecycleEvent::Freeze => Some(true),
                    LifecycleEvent::Resume => Some(false),
                    _ => None,
                };
                if self.apply_lifecycle(event) {
                    match freeze {
                        Some(true) => self.engine.freeze(),
                        Some(false) => self.engine.resume(),
                        None => {}
                    }
                }
            }
            SessionCommand::Freeze => {
                self.engine.freeze();
                self.apply_lifecycle(LifecycleEvent::Freeze);
            }
            SessionCommand::Resume => {
                self.engine.resume();
                self.apply_lifecycle(LifecycleEvent::Resume);
            }
            SessionCommand::Status(reply) => {
                let _ = reply.send(SessionStatus {
                    phase: self.lifecycle.phase().clone(),
                    sync: self.engine.sync_state().clone(),
                    display_generation: self.engine.display_generation(),
                    in_flight_fetches: self.fetches.len(),
                });
            }
            // handled by the run loop
            SessionCommand::Shutdown => {}
        }
    }

    fn place_cells(&mut self, cells: Vec<(i32, i32)>) {
        let GamePhase::Playing(player) = self.lifecycle.phase() else {
            self.emit(SessionEvent::PlacementRejected("Not playing".to_string()));
            return;
        };
        let owner = player.slot;

        self.engine.apply_optimistic_placement(&cells, owner);

        let backend = Arc::clone(&self.backend);
        self.placements
            .spawn(async move { backend.place_cells(owner, cells).await });
    }

    fn on_placement(&mut self, joined: std::result::Result<std::result::Result<u32, String>, JoinError>) {
        match joined {
            Ok(Ok(placed)) => self.emit(SessionEvent::PlacementConfirmed { placed }),
            // The next accepted snapshot removes the optimistic cells
            Ok(Err(message)) => {
                debug!("placement rejected: {message}");
                self.emit(SessionEvent::PlacementRejected(message));
            }
            Err(e) => {
                if !e.is_cancelled() {
                    warn!("placement task failed: {e}");
                }
            }
        }
    }
}
