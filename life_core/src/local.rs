//! Offline game: the tutorial / local-only mode.
//!
//! Runs the same `step_into` the networked client uses, plus the canister's
//! economy: joining costs `BASE_COST`, placing costs `PLACEMENT_COST` per
//! cell (paid into the base treasury), and every siege contact moves up to
//! `SIEGE_DAMAGE` coins from the besieged base to the attacker's wallet.
//! A base with an empty treasury is destroyed together with its owner's
//! cells and territory.

use crate::codec;
use crate::config::{GameConfig, BASE_COST, FAUCET_AMOUNT, MAX_OWNER, MAX_PLACE_CELLS, PLACEMENT_COST, SIEGE_DAMAGE};
use crate::stepper::{step_into, StepOutcome, ZoneMap};
use crate::types::{Cell, ContactKind, DenseGrid, FortifiedZone, Snapshot};
use tracing::{debug, info};

/// Result of one offline generation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalTick {
    pub outcome: StepOutcome,
    /// Owners whose base fell this generation
    pub eliminated: Vec<u8>,
}

pub struct LocalGame {
    config: GameConfig,
    grid: DenseGrid,
    spare: DenseGrid,
    zones: Vec<FortifiedZone>,
    wallets: [u64; MAX_OWNER + 1],
    generation: u64,
}

impl LocalGame {
    pub fn new(config: GameConfig) -> Self {
        let size = config.grid_size;
        Self {
            config,
            grid: DenseGrid::new(size),
            spare: DenseGrid::new(size),
            zones: Vec::new(),
            wallets: [0; MAX_OWNER + 1],
            generation: 0,
        }
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

    pub fn zone_for(&self, owner: u8) -> Option<&FortifiedZone> {
        self.zones.iter().find(|z| z.owner == owner)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn balance(&self, owner: u8) -> u64 {
        self.wallets.get(owner as usize).copied().unwrap_or(0)
    }

    /// Tutorial faucet
    pub fn faucet(&mut self, owner: u8) -> Result<u64, String> {
        let wallet = self.wallet_mut(owner)?;
        *wallet += FAUCET_AMOUNT;
        Ok(*wallet)
    }

    fn wallet_mut(&mut self, owner: u8) -> Result<&mut u64, String> {
        if owner == 0 || owner as usize > self.config.max_players {
            return Err(format!("Invalid slot {} (max {})", owner, self.config.max_players));
        }
        Ok(&mut self.wallets[owner as usize])
    }

    fn bases_would_overlap(&self, x: u16, y: u16, existing: &FortifiedZone) -> bool {
        let size = self.config.grid_size as u16;
        let dx = x.abs_diff(existing.origin_x);
        let dy = y.abs_diff(existing.origin_y);
        let dx = dx.min(size - dx);
        let dy = dy.min(size - dy);
        (dx as usize) < self.config.zone_size && (dy as usize) < self.config.zone_size
    }

    /// Create a base for `owner` with its top-left corner at (x, y)
    pub fn join(&mut self, owner: u8, x: i32, y: i32) -> Result<FortifiedZone, String> {
        let grid_size = self.config.grid_size as i32;
        let balance = *self.wallet_mut(owner)?;

        if self.zone_for(owner).is_some() {
            return Err("Already in game".to_string());
        }
        if balance < BASE_COST {
            return Err(format!("Need {} coins to join", BASE_COST));
        }
        if x < 0 || x >= grid_size || y < 0 || y >= grid_size {
            return Err("Coordinates out of range".to_string());
        }
        let (x, y) = (x as u16, y as u16);
        if self.zones.iter().any(|z| self.bases_would_overlap(x, y, z)) {
            return Err("Overlaps existing base".to_string());
        }

        self.wallets[owner as usize] -= BASE_COST;
        let zone = FortifiedZone { owner, origin_x: x, origin_y: y, coins: BASE_COST };

        // Clear the footprint of enemy cells and claim it
        let size = self.config.grid_size;
        for dy in 0..self.config.zone_size {
            for dx in 0..self.config.zone_size {
                let cx = (x as usize + dx) % size;
                let cy = (y as usize + dy) % size;
                self.grid.set(cx, cy, Cell::new(owner, false));
            }
        }

        self.zones.push(zone);
        info!(owner, x, y, "base created");
        Ok(zone)
    }

    /// Place live cells for `owner`. All-or-nothing, like the canister.
    pub fn place(&mut self, owner: u8, cells: &[(i32, i32)]) -> Result<u32, String> {
        if cells.len() > MAX_PLACE_CELLS {
            return Err(format!("Max {} cells per call", MAX_PLACE_CELLS));
        }
        if cells.is_empty() {
            return Ok(0);
        }

        let zone = *self.zone_for(owner).ok_or("No base")?;
        let cost = cells.len() as u64 * PLACEMENT_COST;
        if *self.wallet_mut(owner)? < cost {
            return Err("Insufficient coins".to_string());
        }

        // Phase 1: validate everything
        let size = self.config.grid_size as i32;
        for &(x, y) in cells {
            if x < 0 || x >= size || y < 0 || y >= size {
                return Err("Coordinates out of range".to_string());
            }
            let (ux, uy) = (x as usize, y as usize);
            let cell = self.grid.get(ux, uy);
            let in_base = zone.contains(ux, uy, self.config.zone_size, self.config.grid_size);
            if !in_base && cell.owner() != owner {
                return Err("Not your territory".to_string());
            }
            if cell.alive() {
                return Err("Cell already alive".to_string());
            }
        }

        // Phase 2: wallet -> base treasury
        self.wallets[owner as usize] -= cost;
        if let Some(z) = self.zones.iter_mut().find(|z| z.owner == owner) {
            z.coins += cost;
        }

        // Phase 3: place
        for &(x, y) in cells {
            self.grid.set(x as usize, y as usize, Cell::new(owner, true));
        }

        Ok(cells.len() as u32)
    }

    /// Advance one generation and settle siege damage
    pub fn step(&mut self) -> LocalTick {
        let mut tick = LocalTick::default();

        if self.grid.has_life() {
            let zone_map = ZoneMap::build(&self.zones, self.config.zone_size, self.config.grid_size);
            tick.outcome = step_into(&self.grid, &mut self.spare, &zone_map);
            self.grid.swap_cells(&mut self.spare);
        }
        self.generation += 1;

        for contact in &tick.outcome.contacts {
            if contact.kind != ContactKind::Siege {
                continue;
            }
            if let Some(fallen) = self.apply_siege(contact.intruder, contact.defender) {
                tick.eliminated.push(fallen);
            }
        }

        for &owner in &tick.eliminated {
            self.eliminate(owner);
        }

        tick
    }

    /// Move siege damage from defender's treasury to the attacker's wallet.
    /// Returns the defender if this emptied its treasury.
    fn apply_siege(&mut self, intruder: u8, defender: u8) -> Option<u8> {
        let zone = self.zones.iter_mut().find(|z| z.owner == defender)?;
        if zone.coins == 0 {
            return None;
        }

        let damage = zone.coins.min(SIEGE_DAMAGE);
        zone.coins -= damage;
        if let Some(wallet) = self.wallets.get_mut(intruder as usize) {
            *wallet += damage;
        }

        (zone.coins == 0).then_some(defender)
    }

    fn eliminate(&mut self, owner: u8) {
        self.zones.retain(|z| z.owner != owner);
        let size = self.grid.size();
        for idx in 0..size * size {
            if let Some(cell) = self.grid.get_idx_mut(idx) {
                if cell.owner() == owner {
                    *cell = Cell::NEUTRAL_DEAD;
                }
            }
        }
        info!(owner, generation = self.generation, "base destroyed");
    }

    /// Run generations until `generation` is reached. Never goes backwards.
    pub fn advance_to(&mut self, generation: u64) -> Vec<u8> {
        let mut eliminated = Vec::new();
        while self.generation < generation {
            eliminated.extend(self.step().eliminated);
        }
        if !eliminated.is_empty() {
            debug!(?eliminated, "eliminations while catching up");
        }
        eliminated
    }

    /// Wire snapshot of the current state
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(codec::encode(&self.grid, self.generation), self.zones.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game() -> LocalGame {
        let mut game = LocalGame::new(GameConfig::with_grid_size(64));
        game.faucet(1).unwrap();
        game.faucet(2).unwrap();
        game
    }

    #[test]
    fn test_join_claims_footprint_and_charges_base_cost() {
        let mut game = game();
        let zone = game.join(1, 60, 60).unwrap();

        assert_eq!(zone.coins, BASE_COST);
        assert_eq!(game.balance(1), FAUCET_AMOUNT - BASE_COST);
        assert_eq!(game.grid().territory_count(1), 64);
        assert_eq!(game.grid().get(3, 3).owner(), 1); // wrapped corner
    }

    #[test]
    fn test_join_validations() {
        let mut game = game();
        assert_eq!(game.join(0, 0, 0).unwrap_err(), "Invalid slot 0 (max 8)");
        assert_eq!(game.join(1, 64, 0).unwrap_err(), "Coordinates out of range");
        game.join(1, 10, 10).unwrap();
        assert_eq!(game.join(1, 30, 30).unwrap_err(), "Already in game");
        assert_eq!(game.join(2, 14, 14).unwrap_err(), "Overlaps existing base");
        assert_eq!(game.join(3, 40, 40).unwrap_err(), "Need 100 coins to join");
        assert!(game.join(2, 18, 10).is_ok());
    }

    #[test]
    fn test_place_is_atomic() {
        let mut game = game();
        game.join(1, 10, 10).unwrap();

        // second cell is outside any territory of P1
        let err = game.place(1, &[(11, 11), (40, 40)]).unwrap_err();
        assert_eq!(err, "Not your territory");
        assert_eq!(game.grid().alive_count(), 0);
        assert_eq!(game.balance(1), FAUCET_AMOUNT - BASE_COST);

        assert_eq!(game.place(1, &[(11, 11), (12, 11)]).unwrap(), 2);
        assert_eq!(game.zone_for(1).unwrap().coins, BASE_COST + 2);
        assert_eq!(game.place(1, &[(11, 11)]).unwrap_err(), "Cell already alive");
        assert_eq!(game.place(2, &[(1, 1)]).unwrap_err(), "No base");
        assert_eq!(game.place(1, &[]).unwrap(), 0);
    }

    #[test]
    fn test_siege_drains_treasury_until_base_falls() {
        let mut game = game();
        game.join(2, 10, 10).unwrap();
        game.join(1, 30, 30).unwrap();

        // A P1 block dropped into P2's base: 4 suppressed survivals = 40 coins
        for (x, y) in [(12, 12), (13, 12), (12, 13), (13, 13)] {
            game.grid.set(x, y, Cell::new(1, true));
        }
        let tick = game.step();
        assert_eq!(tick.outcome.suppressed, 4);
        assert_eq!(game.zone_for(2).unwrap().coins, BASE_COST - 40);
        assert_eq!(game.balance(1), FAUCET_AMOUNT - BASE_COST + 40);
        assert!(tick.eliminated.is_empty());

        // Two more rounds empty the treasury
        for _ in 0..2 {
            for (x, y) in [(12, 12), (13, 12), (12, 13), (13, 13)] {
                game.grid.set(x, y, Cell::new(1, true));
            }
            let tick = game.step();
            if game.zone_for(2).is_none() {
                assert_eq!(tick.eliminated, vec![2]);
            }
        }

        assert!(game.zone_for(2).is_none());
        assert_eq!(game.grid().territory_count(2), 0);
        assert_eq!(game.balance(1), FAUCET_AMOUNT - BASE_COST + BASE_COST);
    }

    #[test]
    fn test_idle_board_still_advances_generation() {
        let mut game = game();
        game.advance_to(10);
        assert_eq!(game.generation(), 10);
        game.advance_to(5);
        assert_eq!(game.generation(), 10);
    }

    #[test]
    fn test_snapshot_roundtrips_through_codec() {
        let mut game = game();
        game.join(1, 5, 5).unwrap();
        game.place(1, &[(6, 6), (7, 6), (8, 6)]).unwrap();
        game.step();

        let snapshot = game.snapshot();
        assert_eq!(snapshot.generation(), 1);
        assert_eq!(snapshot.zones.len(), 1);
        assert_eq!(codec::decode(&snapshot.state, 64), *game.grid());
    }
}
