//! Networked client core for territorial Life.
//!
//! The [`engine`] runs the board optimistically and reconciles it with
//! backend snapshots, the [`lifecycle`] machine tracks where the player is,
//! and a [`session`] drives both from one tokio task.

pub mod backend;
pub mod engine;
pub mod error;
pub mod latency;
pub mod lifecycle;
pub mod observer;
pub mod session;

pub use backend::{GameBackend, SimulatedBackend};
pub use engine::{AcceptReason, EngineMode, ReconciliationEngine, RejectReason, SyncDecision, SyncHealth, SyncState};
pub use error::SessionError;
pub use lifecycle::{EliminationReason, EliminationStats, GamePhase, LifecycleEvent, LifecycleMachine, PlayerState};
pub use observer::{EngineObserver, ObserverSet};
pub use session::{GameSession, SessionEvent, SessionHandle, SessionStatus};
