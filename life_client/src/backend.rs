//! The authoritative backend, as the client sees it.

use async_trait::async_trait;
use life_core::{GameConfig, GameState, LocalGame, ZoneInfo};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Queries and updates the client issues against the canister. Errors are
/// the canister's own `Result<T, String>` messages.
#[async_trait]
pub trait GameBackend: Send + Sync {
    async fn get_state(&self) -> Result<GameState, String>;

    async fn get_bases(&self) -> Result<Vec<ZoneInfo>, String>;

    /// Returns the number of cells placed
    async fn place_cells(&self, owner: u8, cells: Vec<(i32, i32)>) -> Result<u32, String>;
}

// =============================================================================
// SIMULATED BACKEND
// =============================================================================

struct Simulation {
    game: LocalGame,
    started: Instant,
    start_generation: u64,
}

impl Simulation {
    /// Catch the game up to wall-clock time
    fn advance(&mut self, tick_interval_ms: u64) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let target = self.start_generation + elapsed_ms / tick_interval_ms.max(1);
        let eliminated = self.game.advance_to(target);
        if !eliminated.is_empty() {
            debug!(?eliminated, generation = target, "simulated bases destroyed");
        }
    }
}

/// In-process canister stand-in. The game advances lazily, at the configured
/// tick rate, whenever it is queried. Each call waits out half the configured
/// round trip before reading state and half after.
pub struct SimulatedBackend {
    simulation: Mutex<Simulation>,
    tick_interval_ms: u64,
    latency: Duration,
}

impl SimulatedBackend {
    pub fn new(game: LocalGame) -> Self {
        let tick_interval_ms = game.config().tick_interval_ms;
        let start_generation = game.generation();
        Self {
            simulation: Mutex::new(Simulation {
                game,
                started: Instant::now(),
                start_generation,
            }),
            tick_interval_ms,
            latency: Duration::ZERO,
        }
    }

    pub fn from_config(config: GameConfig) -> Self {
        Self::new(LocalGame::new(config))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Run `f` against the up-to-date game (joins, faucet, fixtures)
    pub async fn with_game<R>(&self, f: impl FnOnce(&mut LocalGame) -> R) -> R {
        let mut simulation = self.simulation.lock().await;
        simulation.advance(self.tick_interval_ms);
        f(&mut simulation.game)
    }

    async fn half_trip(&self) {
        if !self.latency.is_zero() {
            sleep(self.latency / 2).await;
        }
    }
}

#[async_trait]
impl GameBackend for SimulatedBackend {
    async fn get_state(&self) -> Result<GameState, String> {
        self.half_trip().await;
        let state = self.with_game(|game| game.snapshot().state).await;
        self.half_trip().await;
        Ok(state)
    }

    async fn get_bases(&self) -> Result<Vec<ZoneInfo>, String> {
        self.half_trip().await;
        let bases = self
            .with_game(|game| {
                game.zones()
                    .iter()
                    .map(|zone| ZoneInfo {
                        x: zone.origin_x,
                        y: zone.origin_y,
                        coins: zone.coins,
                        slot: zone.owner.saturating_sub(1),
                    })
                    .collect()
            })
            .await;
        self.half_trip().await;
        Ok(bases)
    }

    async fn place_cells(&self, owner: u8, cells: Vec<(i32, i32)>) -> Result<u32, String> {
        self.half_trip().await;
        let placed = self.with_game(|game| game.place(owner, &cells)).await;
        self.half_trip().await;
        placed
    }
}
