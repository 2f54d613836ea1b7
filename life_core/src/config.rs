//! Shared game constants and the runtime configuration built from them.
//!
//! Every value here must match the canister, otherwise the reconciliation
//! math (generation estimates, zone footprints, chunk layout) drifts apart.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Grid dimensions (reference deployment)
pub const GRID_SIZE: usize = 512;

/// Territory chunks are 64x64 cells, one u64 word per chunk row
pub const CHUNK_SIZE: usize = 64;
pub const CHUNK_WORDS: usize = 64;
/// The chunk presence mask is a single u64
pub const MAX_CHUNKS: usize = 64;

/// Player limits - owner is packed into 4 bits, 0 is neutral
pub const MAX_PLAYERS: usize = 8;
pub const MAX_OWNER: usize = 15;

/// Timing
pub const LOCAL_TICK_MS: u64 = 125; // 8 gen/sec, matches the canister's GENERATIONS_PER_TICK
pub const POLL_INTERVAL_MS: u64 = 500;
pub const FORCE_SYNC_INTERVAL_MS: u64 = 5_000;
pub const MAX_MISSED_FORCE_SYNCS: u32 = 3;

/// Sync tolerances
pub const SYNC_TOLERANCE_GENERATIONS: u64 = 16; // ~2s of optimistic drift at 8 gen/s
pub const CATCHUP_SLACK_GENERATIONS: u64 = 2;
pub const LATENCY_WINDOW: usize = 20;

/// Base dimensions
pub const BASE_SIZE: usize = 8;

/// Economy (offline mode mirrors the canister)
pub const FAUCET_AMOUNT: u64 = 1000;
pub const BASE_COST: u64 = 100;
pub const PLACEMENT_COST: u64 = 1;
pub const SIEGE_DAMAGE: u64 = 10;
pub const MAX_PLACE_CELLS: usize = 1000;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("grid size {0} must be a positive multiple of 64 with at most 64 chunks")]
    InvalidGridSize(usize),
    #[error("tick interval must be non-zero")]
    ZeroTickInterval,
    #[error("zone size {zone} must be between 1 and the grid size {grid}")]
    InvalidZoneSize { zone: usize, grid: usize },
    #[error("max players {0} must be between 1 and 15")]
    InvalidMaxPlayers(usize),
    #[error("latency window must hold at least one sample")]
    ZeroLatencyWindow,
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub grid_size: usize,
    pub tick_interval_ms: u64,
    pub tolerance_generations: u64,
    pub force_sync_interval_ms: u64,
    pub zone_size: usize,
    pub poll_interval_ms: u64,
    pub catchup_slack_generations: u64,
    pub latency_window: usize,
    pub max_players: usize,
    pub max_missed_force_syncs: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            grid_size: GRID_SIZE,
            tick_interval_ms: LOCAL_TICK_MS,
            tolerance_generations: SYNC_TOLERANCE_GENERATIONS,
            force_sync_interval_ms: FORCE_SYNC_INTERVAL_MS,
            zone_size: BASE_SIZE,
            poll_interval_ms: POLL_INTERVAL_MS,
            catchup_slack_generations: CATCHUP_SLACK_GENERATIONS,
            latency_window: LATENCY_WINDOW,
            max_players: MAX_PLAYERS,
            max_missed_force_syncs: MAX_MISSED_FORCE_SYNCS,
        }
    }
}

impl GameConfig {
    /// Parse a JSON config; missing fields fall back to the reference values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: GameConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reference values on a smaller board. Handy for tests and tutorials.
    pub fn with_grid_size(grid_size: usize) -> Self {
        Self {
            grid_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_size == 0
            || self.grid_size % CHUNK_SIZE != 0
            || self.chunks_per_row() * self.chunks_per_row() > MAX_CHUNKS
        {
            return Err(ConfigError::InvalidGridSize(self.grid_size));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroTickInterval);
        }
        if self.zone_size == 0 || self.zone_size > self.grid_size {
            return Err(ConfigError::InvalidZoneSize {
                zone: self.zone_size,
                grid: self.grid_size,
            });
        }
        if self.max_players == 0 || self.max_players > MAX_OWNER {
            return Err(ConfigError::InvalidMaxPlayers(self.max_players));
        }
        if self.latency_window == 0 {
            return Err(ConfigError::ZeroLatencyWindow);
        }
        Ok(())
    }

    #[inline]
    pub fn total_cells(&self) -> usize {
        self.grid_size * self.grid_size
    }

    /// Alive bitmap length in u64 words
    #[inline]
    pub fn total_words(&self) -> usize {
        self.total_cells() / 64
    }

    #[inline]
    pub fn chunks_per_row(&self) -> usize {
        self.grid_size / CHUNK_SIZE
    }

    /// The window after which a missing sync counts as divergence
    pub fn divergence_ceiling_ms(&self) -> u64 {
        self.force_sync_interval_ms
            .saturating_mul(self.max_missed_force_syncs.max(1) as u64)
    }
}
