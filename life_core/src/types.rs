use crate::config::MAX_OWNER;
use candid::{CandidType, Deserialize};
use serde::Serialize;
use tracing::warn;

// =============================================================================
// CELL ENCODING
// =============================================================================
//
// Each cell is 1 byte:
// ┌─────────┬────────┬──────────┐
// │ bits 7-5│ bit 4  │ bits 3-0 │
// │ unused  │ alive  │  owner   │
// └─────────┴────────┴──────────┘
//
// owner 0 = neutral, 1..=15 = player slot. The owner survives death: it is
// territory, not life.

const OWNER_MASK: u8 = 0x0F;
const ALIVE_BIT: u8 = 0x10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Cell(u8);

impl Cell {
    pub const NEUTRAL_DEAD: Cell = Cell(0);

    #[inline]
    pub fn new(owner: u8, alive: bool) -> Self {
        Cell((owner & OWNER_MASK) | if alive { ALIVE_BIT } else { 0 })
    }

    #[inline] pub fn owner(&self) -> u8   { self.0 & OWNER_MASK }
    #[inline] pub fn alive(&self) -> bool { self.0 & ALIVE_BIT != 0 }
    #[inline] pub fn bits(&self) -> u8    { self.0 }

    #[inline] pub fn set_owner(&mut self, owner: u8) {
        self.0 = (self.0 & !OWNER_MASK) | (owner & OWNER_MASK);
    }
    #[inline] pub fn set_alive(&mut self, alive: bool) {
        if alive { self.0 |= ALIVE_BIT; } else { self.0 &= !ALIVE_BIT; }
    }
}

// =============================================================================
// DENSE GRID
// =============================================================================

/// Flat `size x size` grid, index = y * size + x
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DenseGrid {
    size: usize,
    cells: Vec<Cell>,
}

impl DenseGrid {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            cells: vec![Cell::NEUTRAL_DEAD; size * size],
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.size + x
    }

    #[inline]
    pub fn coords(&self, idx: usize) -> (usize, usize) {
        (idx % self.size, idx / self.size)
    }

    /// Out-of-range coordinates read as neutral dead
    pub fn get(&self, x: usize, y: usize) -> Cell {
        if x >= self.size || y >= self.size {
            return Cell::NEUTRAL_DEAD;
        }
        self.cells[self.index(x, y)]
    }

    /// Returns false (and writes nothing) for out-of-range coordinates
    pub fn set(&mut self, x: usize, y: usize, cell: Cell) -> bool {
        if x >= self.size || y >= self.size {
            return false;
        }
        let idx = self.index(x, y);
        self.cells[idx] = cell;
        true
    }

    pub fn get_idx(&self, idx: usize) -> Option<Cell> {
        self.cells.get(idx).copied()
    }

    pub fn get_idx_mut(&mut self, idx: usize) -> Option<&mut Cell> {
        self.cells.get_mut(idx)
    }

    pub fn alive_count(&self) -> usize {
        self.cells.iter().filter(|c| c.alive()).count()
    }

    pub fn alive_count_for(&self, owner: u8) -> u32 {
        self.cells
            .iter()
            .filter(|c| c.alive() && c.owner() == owner)
            .count() as u32
    }

    pub fn territory_count(&self, owner: u8) -> u32 {
        self.cells.iter().filter(|c| c.owner() == owner).count() as u32
    }

    pub fn has_life(&self) -> bool {
        self.cells.iter().any(|c| c.alive())
    }

    /// Raw cell bytes, used for byte-level determinism checks
    pub fn to_bytes(&self) -> Vec<u8> {
        self.cells.iter().map(|c| c.bits()).collect()
    }

    /// Reset every cell to neutral dead, keeping the allocation
    pub fn clear(&mut self) {
        self.cells.fill(Cell::NEUTRAL_DEAD);
    }

    pub fn swap_cells(&mut self, other: &mut DenseGrid) {
        std::mem::swap(&mut self.cells, &mut other.cells);
        std::mem::swap(&mut self.size, &mut other.size);
    }
}

// =============================================================================
// FORTIFIED ZONES
// =============================================================================

/// A player's base. Its presence in a snapshot is the player's life.
#[derive(Clone, Copy, Debug, PartialEq, Eq, CandidType, Deserialize, Serialize)]
pub struct FortifiedZone {
    pub owner: u8,
    pub origin_x: u16,
    pub origin_y: u16,
    /// Treasury (0 = eliminated)
    pub coins: u64,
}

impl FortifiedZone {
    pub fn new(owner: u8, origin_x: u16, origin_y: u16) -> Self {
        Self { owner, origin_x, origin_y, coins: 0 }
    }

    /// Toroidal containment check
    pub fn contains(&self, x: usize, y: usize, zone_size: usize, grid_size: usize) -> bool {
        if grid_size == 0 {
            return false;
        }
        let dx = (x + grid_size - (self.origin_x as usize % grid_size)) % grid_size;
        let dy = (y + grid_size - (self.origin_y as usize % grid_size)) % grid_size;
        dx < zone_size && dy < zone_size
    }

    /// `None` when the slot has no owner nibble to map to
    pub fn from_wire(info: &ZoneInfo) -> Option<Self> {
        let owner = info.slot.checked_add(1).filter(|&owner| usize::from(owner) <= MAX_OWNER)?;
        Some(Self {
            owner,
            origin_x: info.x,
            origin_y: info.y,
            coins: info.coins,
        })
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

/// Base metadata as the canister reports it (slot is 0-based)
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ZoneInfo {
    pub x: u16,
    pub y: u16,
    pub coins: u64,
    pub slot: u8,
}

/// Sparse per-player territory: one mask bit per 64x64 chunk, then 64 words
/// per present chunk in mask order
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TerritoryExport {
    pub chunk_mask: u64,
    pub chunks: Vec<Vec<u64>>,
}

/// `territories[i]` belongs to owner `i + 1`
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct GameState {
    pub generation: u64,
    pub alive_bitmap: Vec<u64>,
    pub territories: Vec<TerritoryExport>,
}

/// State query plus the zone query, as one unit the engine can apply
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub state: GameState,
    pub zones: Vec<FortifiedZone>,
}

impl Snapshot {
    pub fn new(state: GameState, zones: Vec<FortifiedZone>) -> Self {
        Self { state, zones }
    }

    /// Bases with an out-of-range slot are dropped and logged
    pub fn from_wire(state: GameState, bases: &[ZoneInfo]) -> Self {
        let zones: Vec<FortifiedZone> = bases.iter().filter_map(FortifiedZone::from_wire).collect();
        if zones.len() != bases.len() {
            warn!(
                generation = state.generation,
                dropped_zones = bases.len() - zones.len(),
                "malformed bases, out-of-range slots dropped"
            );
        }
        Self { state, zones }
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.state.generation
    }

    pub fn zone_for(&self, owner: u8) -> Option<&FortifiedZone> {
        self.zones.iter().find(|z| z.owner == owner)
    }
}

// =============================================================================
// CONTACT EVENTS
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContactKind {
    /// Birth or survival suppressed inside a foreign zone
    Siege,
    /// A birth overwrote another player's territory
    Capture,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContactEvent {
    pub intruder: u8,
    pub defender: u8,
    pub x: u16,
    pub y: u16,
    pub kind: ContactKind,
}
