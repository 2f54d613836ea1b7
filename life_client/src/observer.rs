//! Subscriber lists for the render/UI side.
//!
//! Callbacks are fire-and-forget and run on the session task, so they must
//! be quick. Anything slow belongs behind a channel.

use crate::engine::SyncState;
use crate::lifecycle::EliminationStats;
use life_core::{ContactEvent, DenseGrid};

pub trait EngineObserver: Send {
    fn on_cells_changed(&mut self, _grid: &DenseGrid) {}
    /// `state.local_generation` steps back on a drift correction; use
    /// `state.display_generation` for anything shown to the player
    fn on_sync_state_changed(&mut self, _state: &SyncState) {}
    /// Display generation, never decreases
    fn on_generation_changed(&mut self, _generation: u64) {}
    fn on_elimination(&mut self, _stats: &EliminationStats) {}
    fn on_territory_contact(&mut self, _contact: &ContactEvent) {}
}

#[derive(Default)]
pub struct ObserverSet {
    observers: Vec<Box<dyn EngineObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Box<dyn EngineObserver>) {
        self.observers.push(observer);
    }

    pub fn with(mut self, observer: impl EngineObserver + 'static) -> Self {
        self.subscribe(Box::new(observer));
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn cells_changed(&mut self, grid: &DenseGrid) {
        for observer in &mut self.observers {
            observer.on_cells_changed(grid);
        }
    }

    pub fn sync_state_changed(&mut self, state: &SyncState) {
        for observer in &mut self.observers {
            observer.on_sync_state_changed(state);
        }
    }

    pub fn generation_changed(&mut self, generation: u64) {
        for observer in &mut self.observers {
            observer.on_generation_changed(generation);
        }
    }

    pub fn elimination(&mut self, stats: &EliminationStats) {
        for observer in &mut self.observers {
            observer.on_elimination(stats);
        }
    }

    pub fn territory_contact(&mut self, contact: &ContactEvent) {
        for observer in &mut self.observers {
            observer.on_territory_contact(contact);
        }
    }
}

impl std::fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet").field("observers", &self.observers.len()).finish()
    }
}
