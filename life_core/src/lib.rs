//! Deterministic core of territorial Life: cell model, wire codec, stepper
//! and the offline game. No async, no I/O.

pub mod codec;
pub mod config;
pub mod local;
pub mod stepper;
pub mod types;

pub use codec::{decode, decode_with_report, encode, DecodeReport};
pub use config::{ConfigError, GameConfig};
pub use local::{LocalGame, LocalTick};
pub use stepper::{step, step_into, StepOutcome, ZoneMap};
pub use types::{
    Cell, ContactEvent, ContactKind, DenseGrid, FortifiedZone, GameState, Snapshot, TerritoryExport,
    ZoneInfo,
};
