//! Optimistic local simulation reconciled against backend snapshots.
//!
//! The engine owns the grid. It steps it on the local tick and decides, for
//! every snapshot that arrives, whether overriding the local view is worth
//! the visible jump:
//!
//! ```text
//! estimated = snapshot.generation + latency_ms / tick_interval_ms
//! diff      = local_generation - estimated
//!
//! generation < last_synced       -> reject (stale)
//! generation == last_synced      -> reject (stalled), unless force is due
//! diff < -catchup_slack          -> accept (catchup)
//! diff > tolerance               -> accept (drift)
//! now - last_sync >= force_every -> accept (force)
//! otherwise                      -> reject (skip)
//! ```
//!
//! An accepted snapshot replaces the grid and moves `local_generation` to the
//! estimate rather than the reported value, so the next few ticks do not
//! immediately trigger another catchup.

use crate::latency::{LatencyStats, LatencySummary};
use crate::observer::{EngineObserver, ObserverSet};
use life_core::codec::decode_into;
use life_core::stepper::{step_into, ZoneMap};
use life_core::{Cell, ContactEvent, DenseGrid, FortifiedZone, GameConfig, Snapshot};
use serde::Serialize;
use tracing::{debug, info};

// =============================================================================
// DECISIONS
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AcceptReason {
    /// First snapshot after (re)connecting
    Initial,
    Catchup,
    Drift,
    Force,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// Older than the last accepted snapshot
    Stale,
    /// Close enough, or the backend has not moved since the last sync
    Skip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SyncDecision {
    Accepted(AcceptReason),
    Rejected(RejectReason),
}

impl SyncDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SyncDecision::Accepted(_))
    }
}

// =============================================================================
// SYNC STATE
// =============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncState {
    /// Raw local generation. Moves backward when a drift correction is
    /// accepted; `display_generation` does not.
    pub local_generation: u64,
    /// Generation shown to observers, never decreases
    pub display_generation: u64,
    pub last_synced_generation: u64,
    pub last_sync_time_ms: u64,
    /// local - estimated backend generation, as of the last snapshot
    pub drift_generations: i64,
    pub last_decision: Option<SyncDecision>,
    pub accepted: u64,
    pub rejected: u64,
    pub latency: LatencySummary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SyncHealth {
    Healthy,
    /// No accepted snapshot for several force-sync intervals
    Diverged { since_ms: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineMode {
    /// No snapshot applied yet
    Uninitialized,
    Running,
    Frozen,
}

// =============================================================================
// ENGINE
// =============================================================================

pub struct ReconciliationEngine {
    config: GameConfig,
    grid: DenseGrid,
    spare: DenseGrid,
    zones: Vec<FortifiedZone>,
    zone_map: ZoneMap,
    sync: SyncState,
    latency: LatencyStats,
    mode: EngineMode,
    display_generation: u64,
    pending_contacts: Vec<ContactEvent>,
    observers: ObserverSet,
}

impl ReconciliationEngine {
    pub fn new(config: GameConfig) -> Self {
        Self::with_observers(config, ObserverSet::new())
    }

    pub fn with_observers(config: GameConfig, observers: ObserverSet) -> Self {
        let size = config.grid_size;
        Self {
            grid: DenseGrid::new(size),
            spare: DenseGrid::new(size),
            zones: Vec::new(),
            zone_map: ZoneMap::empty(size),
            sync: SyncState::default(),
            latency: LatencyStats::new(config.latency_window),
            mode: EngineMode::Uninitialized,
            display_generation: 0,
            pending_contacts: Vec::new(),
            observers,
            config,
        }
    }

    pub fn subscribe(&mut self, observer: Box<dyn EngineObserver>) {
        self.observers.subscribe(observer);
    }

    pub fn observers_mut(&mut self) -> &mut ObserverSet {
        &mut self.observers
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn grid(&self) -> &DenseGrid {
        &self.grid
    }

    pub fn zones(&self) -> &[FortifiedZone] {
        &self.zones
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync
    }

    pub fn latency(&self) -> &LatencyStats {
        &self.latency
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        self.mode == EngineMode::Running
    }

    pub fn display_generation(&self) -> u64 {
        self.display_generation
    }

    /// Contacts produced by local ticks since the last call
    pub fn take_contacts(&mut self) -> Vec<ContactEvent> {
        std::mem::take(&mut self.pending_contacts)
    }

    // -------------------------------------------------------------------------
    // Snapshot application
    // -------------------------------------------------------------------------

    /// Hard reset to `snapshot`. No decision logic, and the display
    /// generation restarts from the snapshot.
    pub fn initialize(&mut self, snapshot: &Snapshot, now_ms: u64) {
        let generation = snapshot.generation();
        self.apply_snapshot(snapshot, generation, now_ms);
        self.display_generation = generation;
        self.sync.display_generation = generation;
        self.finish_accept(AcceptReason::Initial);
        self.observers.generation_changed(generation);
    }

    /// Apply the first snapshot after (re)connecting, compensated for latency
    /// but without any accept/reject checks.
    pub fn force_sync(&mut self, snapshot: &Snapshot, latency_ms: u64, now_ms: u64) -> SyncDecision {
        self.latency.record(latency_ms);
        let estimated = self.estimate_backend_now(snapshot.generation(), latency_ms);
        self.sync.drift_generations = 0;
        self.apply_snapshot(snapshot, estimated, now_ms);
        self.publish_generation(estimated);
        self.finish_accept(AcceptReason::Initial);
        SyncDecision::Accepted(AcceptReason::Initial)
    }

    pub fn receive_snapshot(&mut self, snapshot: &Snapshot, latency_ms: u64, now_ms: u64) -> SyncDecision {
        if self.mode == EngineMode::Uninitialized {
            return self.force_sync(snapshot, latency_ms, now_ms);
        }

        self.latency.record(latency_ms);

        let generation = snapshot.generation();
        let estimated = self.estimate_backend_now(generation, latency_ms);
        let diff = i128::from(self.sync.local_generation) - i128::from(estimated);
        self.sync.drift_generations = diff.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64;

        let decision = self.decide(generation, diff, now_ms);
        match decision {
            SyncDecision::Accepted(reason) => {
                info!(
                    ?reason,
                    generation,
                    estimated,
                    local = self.sync.local_generation,
                    latency_ms,
                    "snapshot accepted"
                );
                self.apply_snapshot(snapshot, estimated, now_ms);
                self.publish_generation(estimated);
                self.finish_accept(reason);
            }
            SyncDecision::Rejected(reason) => {
                debug!(?reason, generation, diff, "snapshot rejected");
                self.sync.rejected += 1;
                self.sync.last_decision = Some(decision);
                self.sync.latency = self.latency.summary();
                self.observers.sync_state_changed(&self.sync);
            }
        }

        decision
    }

    fn decide(&self, generation: u64, diff: i128, now_ms: u64) -> SyncDecision {
        if generation < self.sync.last_synced_generation {
            return SyncDecision::Rejected(RejectReason::Stale);
        }

        let force_due =
            now_ms.saturating_sub(self.sync.last_sync_time_ms) >= self.config.force_sync_interval_ms;

        // Stalled backend: local ticking would look like drift forever
        if generation == self.sync.last_synced_generation {
            return if force_due {
                SyncDecision::Accepted(AcceptReason::Force)
            } else {
                SyncDecision::Rejected(RejectReason::Skip)
            };
        }

        if diff < -i128::from(self.config.catchup_slack_generations) {
            SyncDecision::Accepted(AcceptReason::Catchup)
        } else if diff > i128::from(self.config.tolerance_generations) {
            SyncDecision::Accepted(AcceptReason::Drift)
        } else if force_due {
            SyncDecision::Accepted(AcceptReason::Force)
        } else {
            SyncDecision::Rejected(RejectReason::Skip)
        }
    }

    fn estimate_backend_now(&self, generation: u64, latency_ms: u64) -> u64 {
        generation.saturating_add(latency_ms / self.config.tick_interval_ms.max(1))
    }

    fn apply_snapshot(&mut self, snapshot: &Snapshot, local_generation: u64, now_ms: u64) {
        // Malformed data is dropped and logged by the codec
        decode_into(&snapshot.state, &mut self.grid);

        self.zones = snapshot.zones.clone();
        self.zone_map = ZoneMap::build(&self.zones, self.config.zone_size, self.config.grid_size);

        self.sync.local_generation = local_generation;
        self.sync.last_synced_generation = snapshot.generation();
        self.sync.last_sync_time_ms = now_ms;
        if self.mode == EngineMode::Uninitialized {
            self.mode = EngineMode::Running;
        }
    }

    fn finish_accept(&mut self, reason: AcceptReason) {
        self.sync.accepted += 1;
        self.sync.last_decision = Some(SyncDecision::Accepted(reason));
        self.sync.latency = self.latency.summary();

        self.observers.cells_changed(&self.grid);
        self.observers.sync_state_changed(&self.sync);
    }

    /// Observers only ever see the generation move forward. A drift
    /// correction holds the display still until local catches up again.
    fn publish_generation(&mut self, generation: u64) {
        if generation > self.display_generation {
            self.display_generation = generation;
            self.sync.display_generation = generation;
            self.observers.generation_changed(generation);
        }
    }

    // -------------------------------------------------------------------------
    // Local simulation
    // -------------------------------------------------------------------------

    /// One local generation. Returns false, and leaves the generation alone,
    /// when the engine is not running or the board is empty.
    pub fn tick(&mut self) -> bool {
        if self.mode != EngineMode::Running || !self.grid.has_life() {
            return false;
        }

        let outcome = step_into(&self.grid, &mut self.spare, &self.zone_map);
        self.grid.swap_cells(&mut self.spare);

        for contact in &outcome.contacts {
            self.observers.territory_contact(contact);
        }
        self.pending_contacts.extend(outcome.contacts);
        self.observers.cells_changed(&self.grid);

        self.sync.local_generation = self.sync.local_generation.saturating_add(1);
        let generation = self.sync.local_generation;
        self.publish_generation(generation);
        self.observers.sync_state_changed(&self.sync);
        true
    }

    /// Mark cells alive for `owner` right away. Unconfirmed: the next accepted
    /// snapshot confirms or overwrites them. Returns how many were applied.
    pub fn apply_optimistic_placement(&mut self, cells: &[(i32, i32)], owner: u8) -> u32 {
        let size = self.grid.size() as i32;
        let mut applied = 0u32;

        for &(x, y) in cells {
            if x < 0 || y < 0 || x >= size || y >= size {
                continue;
            }
            if self.grid.set(x as usize, y as usize, Cell::new(owner, true)) {
                applied += 1;
            }
        }

        if applied > 0 {
            debug!(owner, applied, "optimistic placement");
            self.observers.cells_changed(&self.grid);
        }
        applied
    }

    pub fn freeze(&mut self) {
        if self.mode == EngineMode::Running {
            self.mode = EngineMode::Frozen;
        }
    }

    pub fn resume(&mut self) {
        if self.mode == EngineMode::Frozen {
            self.mode = EngineMode::Running;
        }
    }

    pub fn health(&self, now_ms: u64) -> SyncHealth {
        if self.mode == EngineMode::Uninitialized {
            return SyncHealth::Healthy;
        }
        let since = now_ms.saturating_sub(self.sync.last_sync_time_ms);
        if since >= self.config.divergence_ceiling_ms() {
            SyncHealth::Diverged { since_ms: since }
        } else {
            SyncHealth::Healthy
        }
    }
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("mode", &self.mode)
            .field("sync", &self.sync)
            .field("zones", &self.zones.len())
            .field("display_generation", &self.display_generation)
            .finish()
    }
}
