//! Wire snapshot <-> dense grid conversion.
//!
//! Alive bitmap: 1 bit per cell, row-major, bit `i` of word `w` is cell
//! `w * 64 + i`. Territories: per player a chunk presence mask (bit `c` =
//! chunk `row * chunks_per_row + col`) followed by 64 words per present
//! chunk, word = local row, bit = local column.
//!
//! Decoding never fails. Bits that would land outside the grid are dropped
//! and counted, so a truncated or corrupt snapshot renders as a glitch
//! instead of killing the session.

use crate::config::{CHUNK_SIZE, CHUNK_WORDS, MAX_OWNER};
use crate::types::{DenseGrid, GameState, TerritoryExport};
use tracing::warn;

/// What a decode had to throw away
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeReport {
    /// Set bits with no cell to land on
    pub dropped_bits: u32,
    /// Chunks announced by a mask but missing from the payload
    pub truncated_chunks: u32,
}

impl DecodeReport {
    pub fn is_clean(&self) -> bool {
        self.dropped_bits == 0 && self.truncated_chunks == 0
    }
}

#[inline]
fn popcount_below(mask: u64, idx: usize) -> usize {
    (mask & ((1u64 << idx) - 1)).count_ones() as usize
}

pub fn decode(state: &GameState, grid_size: usize) -> DenseGrid {
    decode_with_report(state, grid_size).0
}

pub fn decode_with_report(state: &GameState, grid_size: usize) -> (DenseGrid, DecodeReport) {
    let mut grid = DenseGrid::new(grid_size);
    let report = decode_into(state, &mut grid);
    (grid, report)
}

/// Decode into an existing grid, reusing its allocation
pub fn decode_into(state: &GameState, grid: &mut DenseGrid) -> DecodeReport {
    let size = grid.size();
    let total_cells = size * size;
    let mut report = DecodeReport::default();

    grid.clear();

    // Pass 1: life
    for (word_idx, &word) in state.alive_bitmap.iter().enumerate() {
        let mut word = word;
        while word != 0 {
            let bit_pos = word.trailing_zeros() as usize;
            word &= word - 1;

            let idx = word_idx * 64 + bit_pos;
            if idx >= total_cells {
                report.dropped_bits += 1;
                continue;
            }
            if let Some(cell) = grid.get_idx_mut(idx) {
                cell.set_alive(true);
            }
        }
    }

    // Pass 2: territory
    for (player_idx, territory) in state.territories.iter().enumerate() {
        let owner = player_idx + 1;
        if owner > MAX_OWNER {
            report.dropped_bits += territory
                .chunks
                .iter()
                .flatten()
                .map(|w| w.count_ones())
                .sum::<u32>();
            continue;
        }
        decode_territory(territory, owner as u8, grid, &mut report);
    }

    if !report.is_clean() {
        warn!(
            generation = state.generation,
            dropped_bits = report.dropped_bits,
            truncated_chunks = report.truncated_chunks,
            "malformed snapshot, out-of-range data dropped"
        );
    }

    report
}

fn decode_territory(
    territory: &TerritoryExport,
    owner: u8,
    grid: &mut DenseGrid,
    report: &mut DecodeReport,
) {
    let size = grid.size();
    let chunks_per_row = size / CHUNK_SIZE;
    let total_chunks = chunks_per_row * chunks_per_row;

    let mut mask = territory.chunk_mask;
    while mask != 0 {
        let chunk_idx = mask.trailing_zeros() as usize;
        mask &= mask - 1;

        let vec_idx = popcount_below(territory.chunk_mask, chunk_idx);
        let Some(chunk) = territory.chunks.get(vec_idx) else {
            report.truncated_chunks += 1;
            continue;
        };

        if chunk_idx >= total_chunks {
            report.dropped_bits += chunk.iter().map(|w| w.count_ones()).sum::<u32>();
            continue;
        }

        let chunk_row = chunk_idx / chunks_per_row;
        let chunk_col = chunk_idx % chunks_per_row;

        for (local_y, &word) in chunk.iter().enumerate().take(CHUNK_WORDS) {
            let mut word = word;
            while word != 0 {
                let local_x = word.trailing_zeros() as usize;
                word &= word - 1;

                let x = chunk_col * CHUNK_SIZE + local_x;
                let y = chunk_row * CHUNK_SIZE + local_y;
                let idx = grid.index(x, y);
                match grid.get_idx_mut(idx) {
                    Some(cell) => cell.set_owner(owner),
                    None => report.dropped_bits += 1,
                }
            }
        }

        if chunk.len() > CHUNK_WORDS {
            report.dropped_bits += chunk[CHUNK_WORDS..]
                .iter()
                .map(|w| w.count_ones())
                .sum::<u32>();
        }
    }
}

/// Dense grid -> wire format. Only non-empty chunks are emitted, and
/// territories run up to the highest owner present.
pub fn encode(grid: &DenseGrid, generation: u64) -> GameState {
    let size = grid.size();
    let chunks_per_row = size / CHUNK_SIZE;

    let mut alive_bitmap = vec![0u64; (size * size).div_ceil(64)];
    let mut max_owner = 0u8;

    for (idx, cell) in grid.cells().iter().enumerate() {
        if cell.alive() {
            alive_bitmap[idx >> 6] |= 1u64 << (idx & 63);
        }
        max_owner = max_owner.max(cell.owner());
    }

    let mut territories = vec![TerritoryExport::default(); max_owner as usize];
    for (player_idx, territory) in territories.iter_mut().enumerate() {
        let owner = (player_idx + 1) as u8;
        for chunk_idx in 0..chunks_per_row * chunks_per_row {
            let chunk_row = chunk_idx / chunks_per_row;
            let chunk_col = chunk_idx % chunks_per_row;

            let mut chunk = vec![0u64; CHUNK_WORDS];
            for (local_y, word) in chunk.iter_mut().enumerate() {
                let y = chunk_row * CHUNK_SIZE + local_y;
                for local_x in 0..CHUNK_SIZE {
                    let x = chunk_col * CHUNK_SIZE + local_x;
                    if grid.get(x, y).owner() == owner {
                        *word |= 1u64 << local_x;
                    }
                }
            }

            if chunk.iter().any(|&w| w != 0) {
                territory.chunk_mask |= 1u64 << chunk_idx;
                territory.chunks.push(chunk);
            }
        }
    }

    GameState {
        generation,
        alive_bitmap,
        territories,
    }
}

/// Decode a raw candid reply from the canister's `get_state` query
pub fn decode_candid(bytes: &[u8]) -> Result<GameState, candid::Error> {
    candid::decode_one::<GameState>(bytes)
}

pub fn encode_candid(state: &GameState) -> Result<Vec<u8>, candid::Error> {
    candid::encode_one(state)
}
