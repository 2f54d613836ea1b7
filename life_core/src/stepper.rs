//! One generation of territorial Conway's Game of Life.
//!
//! Standard B3/S23 on a torus, plus two territorial rules:
//! - a birth takes the owner holding the most live neighbours (ties go to
//!   the lowest slot). With no player neighbours the cell comes alive under
//!   whatever owner its recorded territory already has, neutral or not, and
//!   votes for that owner from the next generation on
//! - inside a fortified zone, only the zone owner's cells may be born or
//!   survive; anything else is suppressed and reported as a siege contact
//!
//! `step` is pure: the same grid and zones always produce the same bytes.
//! Client, offline mode and canister all depend on that.

use crate::config::MAX_OWNER;
use crate::types::{Cell, ContactEvent, ContactKind, DenseGrid, FortifiedZone};
use arrayvec::ArrayVec;
use tracing::debug;

// =============================================================================
// ZONE MAP
// =============================================================================

/// Zones rasterised to one owner byte per cell (0 = outside every zone)
#[derive(Clone, Debug)]
pub struct ZoneMap {
    size: usize,
    owners: Vec<u8>,
    /// Cells claimed by more than one zone (first zone listed keeps them)
    overlaps: u32,
}

impl ZoneMap {
    pub fn build(zones: &[FortifiedZone], zone_size: usize, grid_size: usize) -> Self {
        let mut owners = vec![0u8; grid_size * grid_size];
        let mut overlaps = 0u32;

        if grid_size > 0 {
            for zone in zones {
                let span = zone_size.min(grid_size);
                for dy in 0..span {
                    for dx in 0..span {
                        let x = (zone.origin_x as usize + dx) % grid_size;
                        let y = (zone.origin_y as usize + dy) % grid_size;
                        let idx = y * grid_size + x;
                        if owners[idx] != 0 && owners[idx] != zone.owner {
                            overlaps += 1;
                            continue;
                        }
                        owners[idx] = zone.owner;
                    }
                }
            }
        }

        if overlaps > 0 {
            debug!(overlaps, "overlapping zones, later zones skipped on contested cells");
        }

        Self { size: grid_size, owners, overlaps }
    }

    pub fn empty(grid_size: usize) -> Self {
        Self::build(&[], 0, grid_size)
    }

    #[inline]
    pub fn owner_at(&self, idx: usize) -> u8 {
        self.owners.get(idx).copied().unwrap_or(0)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlaps(&self) -> u32 {
        self.overlaps
    }
}

// =============================================================================
// STEP
// =============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub births: u32,
    pub deaths: u32,
    /// Births and survivals blocked by siege
    pub suppressed: u32,
    pub contacts: Vec<ContactEvent>,
}

/// Cell fate during generation processing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CellFate {
    Survives,
    Birth { new_owner: u8 },
    Death,
    StaysDead,
}

/// Find the majority owner among live neighbours. Ties go to the lowest slot
/// so client and canister agree bit for bit.
fn find_majority_owner(counts: &[u8; MAX_OWNER + 1]) -> u8 {
    let max_count = counts[1..].iter().max().copied().unwrap_or(0);
    if max_count == 0 {
        return 0; // Neutral birth
    }

    let mut candidates: ArrayVec<u8, MAX_OWNER> = ArrayVec::new();
    for (owner, &count) in counts.iter().enumerate().skip(1) {
        if count == max_count {
            candidates.push(owner as u8);
        }
    }

    candidates.first().copied().unwrap_or(0)
}

/// Pre-wrapped (dy, dx) offsets, added then reduced modulo the grid size
#[inline]
fn neighbor_deltas(size: usize) -> [(usize, usize); 8] {
    [
        (size - 1, size - 1), // NW
        (size - 1, 0),        // N
        (size - 1, 1),        // NE
        (0, size - 1),        // W
        (0, 1),               // E
        (1, size - 1),        // SW
        (1, 0),               // S
        (1, 1),               // SE
    ]
}

/// Compute what should happen to a cell WITHOUT modifying the grid: every cell
/// must see the state at the start of the generation.
#[inline]
fn compute_cell_fate(read: &DenseGrid, x: usize, y: usize, deltas: &[(usize, usize); 8]) -> CellFate {
    let size = read.size();
    let cells = read.cells();
    let current = cells[y * size + x];

    let mut alive_count = 0u8;
    let mut owner_counts = [0u8; MAX_OWNER + 1];

    for &(dy, dx) in deltas {
        let ny = (y + dy) % size;
        let nx = (x + dx) % size;
        let neighbor = cells[ny * size + nx];
        if neighbor.alive() {
            alive_count += 1;
            owner_counts[neighbor.owner() as usize] += 1;
        }
    }

    match (current.alive(), alive_count) {
        (true, 2) | (true, 3) => CellFate::Survives,
        (false, 3) => CellFate::Birth { new_owner: find_majority_owner(&owner_counts) },
        (true, _) => CellFate::Death,
        (false, _) => CellFate::StaysDead,
    }
}

/// Advance `read` one generation into `write` (resized if needed).
pub fn step_into(read: &DenseGrid, write: &mut DenseGrid, zones: &ZoneMap) -> StepOutcome {
    let size = read.size();
    if write.size() != size {
        *write = DenseGrid::new(size);
    }

    let mut outcome = StepOutcome::default();
    if size == 0 {
        return outcome;
    }

    let deltas = neighbor_deltas(size);

    for y in 0..size {
        for x in 0..size {
            let idx = y * size + x;
            let current = read.cells()[idx];
            let zone_owner = if zones.size() == size { zones.owner_at(idx) } else { 0 };

            let fate = compute_cell_fate(read, x, y, &deltas);

            // Territory persists by default; only a birth can move it
            let mut next = Cell::new(current.owner(), false);

            match fate {
                CellFate::Survives => {
                    let owner = current.owner();
                    if zone_owner != 0 && zone_owner != owner {
                        outcome.suppressed += 1;
                        outcome.deaths += 1;
                        push_siege(&mut outcome, owner, zone_owner, x, y);
                    } else {
                        next.set_alive(true);
                    }
                }
                CellFate::Birth { new_owner } => {
                    if zone_owner != 0 && zone_owner != new_owner {
                        outcome.suppressed += 1;
                        push_siege(&mut outcome, new_owner, zone_owner, x, y);
                    } else {
                        next.set_alive(true);
                        outcome.births += 1;

                        // Neutral births leave the recorded territory alone
                        if new_owner != 0 {
                            let old_owner = current.owner();
                            if old_owner != 0 && old_owner != new_owner {
                                outcome.contacts.push(ContactEvent {
                                    intruder: new_owner,
                                    defender: old_owner,
                                    x: x as u16,
                                    y: y as u16,
                                    kind: ContactKind::Capture,
                                });
                            }
                            next.set_owner(new_owner);
                        }
                    }
                }
                CellFate::Death => outcome.deaths += 1,
                CellFate::StaysDead => {}
            }

            if let Some(slot) = write.get_idx_mut(idx) {
                *slot = next;
            }
        }
    }

    outcome
}

fn push_siege(outcome: &mut StepOutcome, intruder: u8, defender: u8, x: usize, y: usize) {
    // Neutral life has nobody to charge
    if intruder == 0 {
        return;
    }
    outcome.contacts.push(ContactEvent {
        intruder,
        defender,
        x: x as u16,
        y: y as u16,
        kind: ContactKind::Siege,
    });
}

/// Allocating convenience wrapper around `step_into`
pub fn step(grid: &DenseGrid, zones: &[FortifiedZone], zone_size: usize) -> (DenseGrid, StepOutcome) {
    let zone_map = ZoneMap::build(zones, zone_size, grid.size());
    let mut next = DenseGrid::new(grid.size());
    let outcome = step_into(grid, &mut next, &zone_map);
    (next, outcome)
}
