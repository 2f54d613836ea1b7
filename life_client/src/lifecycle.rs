//! Player lifecycle: a tagged phase plus the `had_base` guard.
//!
//! Transitions are a total function `(phase, event) -> Option<phase>`. A
//! `None` means the event does not apply in that phase, and the machine keeps
//! its phase. UI code fires events speculatively from async callbacks, so a
//! rejected transition is routine and only logged.
//!
//! Elimination fires only while Playing, and only once a join has been
//! confirmed. Without the second condition the first snapshot after a join
//! request, which does not contain the new base yet, would eliminate the
//! player on the spot.

use life_core::FortifiedZone;
use serde::Serialize;
use tracing::{debug, info};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlayerState {
    /// Owner id on the grid (1-based)
    pub slot: u8,
    pub has_base: bool,
    pub joined_at_generation: u64,
    pub peak_territory: u32,
    pub coins_earned: u64,
}

impl PlayerState {
    pub fn new(slot: u8, joined_at_generation: u64) -> Self {
        Self {
            slot,
            has_base: true,
            joined_at_generation,
            peak_territory: 0,
            coins_earned: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EliminationReason {
    /// Base drained by siege
    BaseDestroyed,
    /// Base removed after the player had no live cells left
    GracePeriodExpired,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EliminationStats {
    pub generations_survived: u64,
    pub peak_territory: u32,
    pub coins_earned: u64,
    pub reason: EliminationReason,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum GamePhase {
    Initializing,
    Unauthenticated,
    SelectingRegion,
    SelectingServer {
        region: String,
    },
    JoiningSlot {
        server: String,
        pending_slot: Option<u8>,
        last_error: Option<String>,
    },
    Playing(PlayerState),
    Frozen(PlayerState),
    Eliminated {
        stats: EliminationStats,
        previous_player: PlayerState,
    },
    Spectating,
    Error {
        message: String,
        recoverable: bool,
    },
}

impl GamePhase {
    pub fn name(&self) -> &'static str {
        match self {
            GamePhase::Initializing => "initializing",
            GamePhase::Unauthenticated => "unauthenticated",
            GamePhase::SelectingRegion => "selecting-region",
            GamePhase::SelectingServer { .. } => "selecting-server",
            GamePhase::JoiningSlot { .. } => "joining-slot",
            GamePhase::Playing(_) => "playing",
            GamePhase::Frozen(_) => "frozen",
            GamePhase::Eliminated { .. } => "eliminated",
            GamePhase::Spectating => "spectating",
            GamePhase::Error { .. } => "error",
        }
    }

    /// The active player, while playing or frozen
    pub fn player(&self) -> Option<&PlayerState> {
        match self {
            GamePhase::Playing(player) | GamePhase::Frozen(player) => Some(player),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    Initialized { authenticated: bool },
    Authenticated,
    SignedOut,
    RegionSelected(String),
    ServerSelected(String),
    JoinRequested { slot: u8 },
    JoinConfirmed { slot: u8, generation: u64 },
    JoinFailed { message: String },
    Freeze,
    Resume,
    Spectate,
    Rejoin,
    Failed { message: String, recoverable: bool },
    Recover,
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// Pure transition function. `last_server` is where a rejoin goes back to.
pub fn transition(phase: &GamePhase, event: &LifecycleEvent, last_server: Option<&str>) -> Option<GamePhase> {
    use GamePhase as P;
    use LifecycleEvent as E;

    let next = match (phase, event) {
        (_, E::Failed { message, recoverable }) => P::Error {
            message: message.clone(),
            recoverable: *recoverable,
        },
        (P::Unauthenticated, E::SignedOut) => return None,
        (_, E::SignedOut) => P::Unauthenticated,

        (P::Initializing, E::Initialized { authenticated: true }) => P::SelectingRegion,
        (P::Initializing, E::Initialized { authenticated: false }) => P::Unauthenticated,
        (P::Unauthenticated, E::Authenticated) => P::SelectingRegion,

        (P::SelectingRegion, E::RegionSelected(region)) => P::SelectingServer { region: region.clone() },
        (P::SelectingServer { .. }, E::ServerSelected(server)) => P::JoiningSlot {
            server: server.clone(),
            pending_slot: None,
            last_error: None,
        },

        (P::JoiningSlot { server, pending_slot: None, .. }, E::JoinRequested { slot }) => P::JoiningSlot {
            server: server.clone(),
            pending_slot: Some(*slot),
            last_error: None,
        },
        (P::JoiningSlot { pending_slot: Some(pending), .. }, E::JoinConfirmed { slot, generation })
            if pending == slot =>
        {
            P::Playing(PlayerState::new(*slot, *generation))
        }
        (P::JoiningSlot { server, pending_slot: Some(_), .. }, E::JoinFailed { message }) => P::JoiningSlot {
            server: server.clone(),
            pending_slot: None,
            last_error: Some(message.clone()),
        },

        (P::Playing(player), E::Freeze) => P::Frozen(player.clone()),
        (P::Frozen(player), E::Resume) => P::Playing(player.clone()),

        (P::Playing(_) | P::Frozen(_) | P::Eliminated { .. }, E::Spectate) => P::Spectating,
        (P::Eliminated { .. } | P::Spectating, E::Rejoin) => match last_server {
            Some(server) => P::JoiningSlot {
                server: server.to_string(),
                pending_slot: None,
                last_error: None,
            },
            None => P::SelectingRegion,
        },

        _ => return None,
    };

    Some(next)
}

// =============================================================================
// MACHINE
// =============================================================================

#[derive(Clone, Debug)]
pub struct LifecycleMachine {
    phase: GamePhase,
    /// Set only by a confirmed join, cleared on elimination / spectate / sign-out
    had_base: bool,
    last_server: Option<String>,
    /// Phase to return to from a recoverable error
    before_error: Option<Box<GamePhase>>,
}

impl Default for LifecycleMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleMachine {
    pub fn new() -> Self {
        Self {
            phase: GamePhase::Initializing,
            had_base: false,
            last_server: None,
            before_error: None,
        }
    }

    pub fn phase(&self) -> &GamePhase {
        &self.phase
    }

    pub fn had_base(&self) -> bool {
        self.had_base
    }

    pub fn player(&self) -> Option<&PlayerState> {
        self.phase.player()
    }

    /// Apply `event`. Returns true if the phase changed; an event that does
    /// not apply leaves the phase untouched.
    pub fn apply(&mut self, event: LifecycleEvent) -> bool {
        if event == LifecycleEvent::Recover {
            return self.recover();
        }

        let Some(next) = transition(&self.phase, &event, self.last_server.as_deref()) else {
            debug!(phase = self.phase.name(), ?event, "transition rejected");
            return false;
        };

        match &event {
            LifecycleEvent::JoinConfirmed { .. } => self.had_base = true,
            LifecycleEvent::Spectate | LifecycleEvent::SignedOut | LifecycleEvent::Rejoin => {
                self.had_base = false
            }
            LifecycleEvent::ServerSelected(server) => self.last_server = Some(server.clone()),
            LifecycleEvent::Failed { recoverable: true, .. } => {
                if !matches!(self.phase, GamePhase::Error { .. }) {
                    self.before_error = Some(Box::new(self.phase.clone()));
                }
            }
            LifecycleEvent::Failed { recoverable: false, .. } => self.before_error = None,
            _ => {}
        }

        info!(from = self.phase.name(), to = next.name(), "phase change");
        self.phase = next;
        true
    }

    fn recover(&mut self) -> bool {
        if !matches!(self.phase, GamePhase::Error { recoverable: true, .. }) {
            debug!(phase = self.phase.name(), "nothing to recover from");
            return false;
        }
        let previous = self.before_error.take().map(|p| *p).unwrap_or(GamePhase::Initializing);
        info!(to = previous.name(), "recovered");
        self.phase = previous;
        true
    }

    /// Track the player's territory high-water mark
    pub fn record_territory(&mut self, territory: u32) {
        if let GamePhase::Playing(player) | GamePhase::Frozen(player) = &mut self.phase {
            player.peak_territory = player.peak_territory.max(territory);
        }
    }

    pub fn record_coins_earned(&mut self, amount: u64) {
        if let GamePhase::Playing(player) | GamePhase::Frozen(player) = &mut self.phase {
            player.coins_earned += amount;
        }
    }

    /// Check the latest zones for the player's base. Fires at most once per
    /// loss: the phase moves to Eliminated, so a repeat call finds nothing.
    pub fn check_elimination(
        &mut self,
        zones: &[FortifiedZone],
        current_generation: u64,
        player_alive_cells: u32,
    ) -> Option<EliminationStats> {
        if !self.had_base {
            return None;
        }
        let GamePhase::Playing(player) = &self.phase else {
            return None;
        };
        if zones.iter().any(|z| z.owner == player.slot) {
            return None;
        }

        let reason = if player_alive_cells == 0 {
            EliminationReason::GracePeriodExpired
        } else {
            EliminationReason::BaseDestroyed
        };
        let stats = EliminationStats {
            generations_survived: current_generation.saturating_sub(player.joined_at_generation),
            peak_territory: player.peak_territory,
            coins_earned: player.coins_earned,
            reason,
        };

        let mut previous_player = player.clone();
        previous_player.has_base = false;

        info!(slot = previous_player.slot, ?reason, generation = current_generation, "player eliminated");
        self.had_base = false;
        self.phase = GamePhase::Eliminated {
            stats: stats.clone(),
            previous_player,
        };
        Some(stats)
    }
}
