//! Spatial spawn grid gating probabilistic powerup spawns.
//!
//! The map is split into fixed-size square chunks. Each chunk carries a
//! cooldown timestamp, a live-occupancy counter and a precomputed, immutable
//! set of candidate zone centers. One chunk is evaluated per second, cycling
//! round-robin, which bounds the per-tick cost regardless of map size.

use crate::constants::*;
use crate::support::get_random_int;
use rand::Rng;
use std::collections::HashMap;

/// Maps world coordinates to a chunk index. Index 0 is reserved invalid and
/// is never produced for in-bounds coordinates.
pub fn chunk_index(x: f64, y: f64) -> u32 {
    let hpos_x = ((x as i64) >> POWERUPS_GRID_POW) + POWERUPS_GRID_COLS / 2;
    let hpos_y = ((y as i64) >> POWERUPS_GRID_POW) + POWERUPS_GRID_ROWS / 2;

    (hpos_y * POWERUPS_GRID_COLS + hpos_x + 1) as u32
}

#[derive(Debug)]
pub struct SpawnChunk {
    /// Timestamp of the most recent spawn in this chunk.
    pub last_ms: u64,
    /// Number of spawned powerups currently occupying the chunk.
    pub spawned: u32,
    /// Non-overlapping candidate zone centers, fixed at startup.
    pub zones: Vec<(f64, f64)>,
}

#[derive(Debug)]
pub struct SpawnGrid {
    chunks: HashMap<u32, SpawnChunk>,
}

impl Default for SpawnGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl SpawnGrid {
    /// Builds the grid once from map geometry: every chunk gets four zone
    /// centers inset from its borders.
    pub fn new() -> Self {
        let mut chunks = HashMap::new();
        let side = (1i64 << POWERUPS_GRID_POW) as f64;

        for index in 1..=POWERUPS_GRID_CHUNKS {
            let hpos_x = ((index - 1) as i64) % POWERUPS_GRID_COLS;
            let hpos_y = ((index - 1) as i64) / POWERUPS_GRID_COLS;

            let min_x = ((hpos_x - POWERUPS_GRID_COLS / 2) << POWERUPS_GRID_POW) as f64;
            let min_y = ((hpos_y - POWERUPS_GRID_ROWS / 2) << POWERUPS_GRID_POW) as f64;

            let zones = vec![
                (min_x + POWERUPS_ZONE_INSET, min_y + POWERUPS_ZONE_INSET),
                (min_x + side - POWERUPS_ZONE_INSET, min_y + POWERUPS_ZONE_INSET),
                (min_x + POWERUPS_ZONE_INSET, min_y + side - POWERUPS_ZONE_INSET),
                (min_x + side - POWERUPS_ZONE_INSET, min_y + side - POWERUPS_ZONE_INSET),
            ];

            chunks.insert(
                index,
                SpawnChunk {
                    last_ms: 0,
                    spawned: 0,
                    zones,
                },
            );
        }

        Self { chunks }
    }

    pub fn get(&self, index: u32) -> Option<&SpawnChunk> {
        self.chunks.get(&index)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut SpawnChunk> {
        self.chunks.get_mut(&index)
    }

    pub fn contains(&self, index: u32) -> bool {
        self.chunks.contains_key(&index)
    }

    /// Registers a spawn at the coordinates: bumps occupancy and resets the
    /// chunk cooldown.
    pub fn mark_spawned(&mut self, x: f64, y: f64, now_ms: u64) {
        if let Some(chunk) = self.chunks.get_mut(&chunk_index(x, y)) {
            chunk.spawned += 1;
            chunk.last_ms = now_ms;
        }
    }

    /// Releases occupancy after a pickup or despawn at the coordinates.
    pub fn mark_released(&mut self, x: f64, y: f64) {
        if let Some(chunk) = self.chunks.get_mut(&chunk_index(x, y)) {
            chunk.spawned = chunk.spawned.saturating_sub(1);
        }
    }
}

/// Gating decision for one chunk. Guarantees a spawn within
/// `POWERUPS_SPAWN_GUARANTEED_SEC` seconds of eligibility regardless of the
/// configured probability, and scales earlier spawns with it.
pub fn should_spawn<R: Rng>(
    chunk: &SpawnChunk,
    now_ms: u64,
    spawn_chance: f64,
    rng: &mut R,
) -> bool {
    if spawn_chance == 0.0 {
        return false;
    }

    if chunk.spawned != 0 {
        return false;
    }

    if chunk.last_ms + POWERUPS_RESPAWN_TIMEOUT_MS > now_ms {
        return false;
    }

    let min_to_spawn = POWERUPS_SPAWN_GUARANTEED_SEC
        - (spawn_chance * POWERUPS_SPAWN_GUARANTEED_SEC as f64).ceil() as i64;

    let elapsed_sec = ((now_ms - chunk.last_ms - POWERUPS_RESPAWN_TIMEOUT_MS) as f64
        / MS_PER_SEC as f64)
        .ceil() as i64;

    let draw = get_random_int(rng, elapsed_sec, POWERUPS_SPAWN_GUARANTEED_SEC);

    elapsed_sec >= POWERUPS_SPAWN_GUARANTEED_SEC || draw >= min_to_spawn
}

/// Picks a spawn position: a random zone center plus jitter bounded by the
/// powerup radius margin. Returns `None` for an unknown chunk or an empty
/// zone set.
pub fn pick_position<R: Rng>(grid: &SpawnGrid, index: u32, rng: &mut R) -> Option<(f64, f64)> {
    let chunk = grid.get(index)?;

    if chunk.zones.is_empty() {
        return None;
    }

    let zone = get_random_int(rng, 0, chunk.zones.len() as i64 - 1) as usize;
    let (x, y) = chunk.zones[zone];

    let jitter_x = get_random_int(rng, -POWERUPS_SPAWN_JITTER, POWERUPS_SPAWN_JITTER) as f64;
    let jitter_y = get_random_int(rng, -POWERUPS_SPAWN_JITTER, POWERUPS_SPAWN_JITTER) as f64;

    Some((x + jitter_x, y + jitter_y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn idle_chunk() -> SpawnChunk {
        SpawnChunk {
            last_ms: 0,
            spawned: 0,
            zones: vec![(0.0, 0.0)],
        }
    }

    #[test]
    fn test_chunk_index_is_a_bijection_in_bounds() {
        let side = (1i64 << POWERUPS_GRID_POW) as f64;
        let mut seen = HashSet::new();

        for row in 0..POWERUPS_GRID_ROWS {
            for col in 0..POWERUPS_GRID_COLS {
                let x = ((col - POWERUPS_GRID_COLS / 2) as f64) * side + side / 2.0;
                let y = ((row - POWERUPS_GRID_ROWS / 2) as f64) * side + side / 2.0;

                let index = chunk_index(x, y);
                assert_ne!(index, 0, "index 0 produced for in-bounds ({}, {})", x, y);
                assert!(index <= POWERUPS_GRID_CHUNKS);
                assert!(seen.insert(index), "duplicate index {}", index);
            }
        }

        assert_eq!(seen.len(), POWERUPS_GRID_CHUNKS as usize);
    }

    #[test]
    fn test_chunk_index_corners() {
        // Top-left corner of the map lands in chunk 1, bottom-right in the
        // last chunk.
        assert_eq!(chunk_index(-MAP_WIDTH / 2.0, -MAP_HEIGHT / 2.0), 1);
        assert_eq!(
            chunk_index(MAP_WIDTH / 2.0 - 1.0, MAP_HEIGHT / 2.0 - 1.0),
            POWERUPS_GRID_CHUNKS
        );
    }

    #[test]
    fn test_grid_covers_every_index() {
        let grid = SpawnGrid::new();

        assert!(!grid.contains(0));

        for index in 1..=POWERUPS_GRID_CHUNKS {
            let chunk = grid.get(index).unwrap();
            assert_eq!(chunk.zones.len(), 4);
            assert_eq!(chunk.spawned, 0);
        }
    }

    #[test]
    fn test_zone_centers_map_back_to_their_chunk() {
        let grid = SpawnGrid::new();

        for index in 1..=POWERUPS_GRID_CHUNKS {
            for &(x, y) in &grid.get(index).unwrap().zones {
                assert_eq!(chunk_index(x, y), index);
            }
        }
    }

    #[test]
    fn test_zero_chance_never_spawns() {
        let mut rng = StdRng::seed_from_u64(1);
        let chunk = idle_chunk();

        // Even after arbitrary elapsed time.
        let far_future = POWERUPS_RESPAWN_TIMEOUT_MS + 10_000_000;
        for _ in 0..100 {
            assert!(!should_spawn(&chunk, far_future, 0.0, &mut rng));
        }
    }

    #[test]
    fn test_full_chance_spawns_at_guaranteed_window() {
        let mut rng = StdRng::seed_from_u64(1);
        let chunk = idle_chunk();

        let at_window = chunk.last_ms
            + POWERUPS_RESPAWN_TIMEOUT_MS
            + (POWERUPS_SPAWN_GUARANTEED_SEC as u64) * MS_PER_SEC;

        // With chance 1 the threshold is zero, so any draw spawns.
        assert!(should_spawn(&chunk, at_window, 1.0, &mut rng));

        // Any chance spawns once the guaranteed window has fully elapsed.
        assert!(should_spawn(&chunk, at_window, 0.001, &mut rng));
    }

    #[test]
    fn test_cooldown_blocks_spawn() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut chunk = idle_chunk();
        chunk.last_ms = 100_000;

        let within_cooldown = chunk.last_ms + POWERUPS_RESPAWN_TIMEOUT_MS - 1;
        assert!(!should_spawn(&chunk, within_cooldown, 1.0, &mut rng));
    }

    #[test]
    fn test_occupied_chunk_never_spawns() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut chunk = idle_chunk();
        chunk.spawned = 1;

        let far_future = POWERUPS_RESPAWN_TIMEOUT_MS + 10_000_000;
        assert!(!should_spawn(&chunk, far_future, 1.0, &mut rng));
    }

    #[test]
    fn test_occupancy_roundtrip() {
        let mut grid = SpawnGrid::new();

        grid.mark_spawned(100.0, 100.0, 5000);
        let index = chunk_index(100.0, 100.0);
        assert_eq!(grid.get(index).unwrap().spawned, 1);
        assert_eq!(grid.get(index).unwrap().last_ms, 5000);

        grid.mark_released(100.0, 100.0);
        assert_eq!(grid.get(index).unwrap().spawned, 0);

        // Release below zero saturates instead of underflowing.
        grid.mark_released(100.0, 100.0);
        assert_eq!(grid.get(index).unwrap().spawned, 0);
    }

    #[test]
    fn test_pick_position_jitter_stays_near_zone() {
        let grid = SpawnGrid::new();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..100 {
            let (x, y) = pick_position(&grid, 1, &mut rng).unwrap();
            let chunk = grid.get(1).unwrap();

            let near_zone = chunk.zones.iter().any(|&(zx, zy)| {
                (x - zx).abs() <= POWERUPS_SPAWN_JITTER as f64
                    && (y - zy).abs() <= POWERUPS_SPAWN_JITTER as f64
            });
            assert!(near_zone);
        }
    }
}
