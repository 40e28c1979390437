//! Powerup spawning over the spatial grid, despawn lifetimes and pickups.
//!
//! One chunk is evaluated per second, cycling round-robin through the whole
//! grid, so a full sweep takes one grid's worth of seconds regardless of
//! tick rate.

use crate::constants::*;
use crate::dispatch::{Event, EventKind, EventSink, System, SystemResult};
use crate::relay::{MobId, PlayerId, Recipients, SimCommand};
use crate::spawn_grid::{self, chunk_index};
use crate::world::{Mob, Powerup, PowerupKind, World};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    marshal_server_message, ServerPacket, DESPAWN_TYPE_EXPIRED, DESPAWN_TYPE_PICKUP,
};

pub struct PowerupsSystem {
    rng: StdRng,
    /// Next grid chunk in the round-robin sweep, in `1..=CHUNKS`.
    chunk_to_check: u32,
}

impl PowerupsSystem {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            chunk_to_check: 1,
        }
    }

    fn broadcast(&self, world: &World, sink: &mut EventSink, packet: &ServerPacket) -> SystemResult {
        let recipients = world.broadcast_connections();

        if recipients.is_empty() {
            return Ok(());
        }

        let frame = marshal_server_message(packet)?;
        sink.send(SimCommand::SendPackets {
            frame,
            recipients: Recipients::Many(recipients),
            exceptions: None,
        });
        Ok(())
    }

    fn random_kind(&mut self) -> PowerupKind {
        if self.rng.gen_bool(0.5) {
            PowerupKind::Shield
        } else {
            PowerupKind::Inferno
        }
    }

    /// Evaluates one chunk for a probabilistic spawn and advances the sweep
    /// cursor.
    fn on_clock_second(&mut self, world: &mut World, sink: &mut EventSink) {
        let index = self.chunk_to_check;
        self.chunk_to_check += 1;
        if self.chunk_to_check > POWERUPS_GRID_CHUNKS {
            self.chunk_to_check = 1;
        }

        let chance = world.config.powerup_spawn_chance;
        let now = world.now_ms;

        let eligible = world
            .spawn_grid
            .get(index)
            .map(|chunk| spawn_grid::should_spawn(chunk, now, chance, &mut self.rng))
            .unwrap_or(false);

        if eligible {
            if let Some((x, y)) = spawn_grid::pick_position(&world.spawn_grid, index, &mut self.rng) {
                let kind = self.random_kind();
                sink.emit(Event::PowerupsSpawn {
                    kind,
                    x,
                    y,
                    owner: None,
                    permanent: false,
                });
            }
        }

        // Expire overdue powerups. Collected first, raised after, so the
        // mob map is never mutated mid-scan.
        let expired: Vec<MobId> = world
            .mobs
            .values()
            .filter_map(|mob| match mob {
                Mob::Powerup(powerup) => match powerup.despawn_at {
                    Some(at) if at <= now => Some(powerup.id),
                    _ => None,
                },
                _ => None,
            })
            .collect();

        for mob in expired {
            sink.emit(Event::PowerupsDespawn { mob });
        }
    }

    fn on_spawn(
        &mut self,
        world: &mut World,
        sink: &mut EventSink,
        kind: PowerupKind,
        x: f64,
        y: f64,
        owner: Option<PlayerId>,
        permanent: bool,
    ) -> SystemResult {
        let now = world.now_ms;
        let id = world.mob_ids.allocate();

        let despawn_at = if permanent {
            None
        } else {
            Some(now + POWERUPS_DEFAULT_DESPAWN_MS)
        };

        world.insert_mob(Mob::Powerup(Powerup {
            id,
            kind,
            pos: shared::Vector2::new(x, y),
            despawn_at,
            owner,
        }));

        // Upgrades never count against grid occupancy; only shields and
        // infernos block the chunk they sit in.
        if kind != PowerupKind::Upgrade {
            world.spawn_grid.mark_spawned(x, y, now);
        }

        debug!("Powerup {} ({:?}) spawned at ({}, {})", id, kind, x, y);

        self.broadcast(
            world,
            sink,
            &ServerPacket::MobSpawn {
                id,
                mob_type: kind.as_u8(),
                pos_x: x,
                pos_y: y,
            },
        )?;

        Ok(())
    }

    fn on_despawn(&mut self, world: &mut World, sink: &mut EventSink, mob_id: MobId) -> SystemResult {
        let powerup = match world.remove_mob(mob_id) {
            Some(Mob::Powerup(powerup)) => powerup,
            _ => return Ok(()),
        };

        if powerup.kind != PowerupKind::Upgrade {
            world.spawn_grid.mark_released(powerup.pos.x, powerup.pos.y);
        }

        self.broadcast(
            world,
            sink,
            &ServerPacket::MobDespawn {
                id: mob_id,
                despawn_type: DESPAWN_TYPE_EXPIRED,
            },
        )?;

        sink.emit(Event::PowerupsDespawned { mob: mob_id });

        Ok(())
    }

    fn on_picked(
        &mut self,
        world: &mut World,
        sink: &mut EventSink,
        mob_id: MobId,
        player_id: Option<PlayerId>,
    ) -> SystemResult {
        let powerup = match world.remove_mob(mob_id) {
            Some(Mob::Powerup(powerup)) => powerup,
            _ => return Ok(()),
        };

        if powerup.kind != PowerupKind::Upgrade {
            world.spawn_grid.mark_released(powerup.pos.x, powerup.pos.y);
        }

        if let Some(player) = player_id.and_then(|id| world.players.get_mut(&id)) {
            match powerup.kind {
                PowerupKind::Shield => {
                    player.shielded = true;
                }
                PowerupKind::Upgrade => {
                    player.upgrades.defense =
                        (player.upgrades.defense + 1).min(UPGRADES_DEFENSE_FACTOR.len() - 1);
                }
                PowerupKind::Inferno => {}
            }
        }

        self.broadcast(
            world,
            sink,
            &ServerPacket::MobDespawn {
                id: mob_id,
                despawn_type: DESPAWN_TYPE_PICKUP,
            },
        )?;

        sink.emit(Event::PowerupsDespawned { mob: mob_id });
        sink.emit(Event::PowerupsSpawnByCoords {
            x: powerup.pos.x,
            y: powerup.pos.y,
        });

        Ok(())
    }

    /// Re-check the chunk under the coordinates right after a pickup freed
    /// a slot. The respawn cooldown usually blocks this; it exists so
    /// permanent slots refill without waiting for the sweep.
    fn on_spawn_by_coords(&mut self, world: &mut World, sink: &mut EventSink, x: f64, y: f64) {
        let index = chunk_index(x, y);
        let chance = world.config.powerup_spawn_chance;
        let now = world.now_ms;

        let eligible = world
            .spawn_grid
            .get(index)
            .map(|chunk| spawn_grid::should_spawn(chunk, now, chance, &mut self.rng))
            .unwrap_or(false);

        if eligible {
            if let Some((x, y)) = spawn_grid::pick_position(&world.spawn_grid, index, &mut self.rng) {
                let kind = self.random_kind();
                sink.emit(Event::PowerupsSpawn {
                    kind,
                    x,
                    y,
                    owner: None,
                    permanent: false,
                });
            }
        }
    }
}

impl System for PowerupsSystem {
    fn name(&self) -> &'static str {
        "powerups"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::TimelineClockSecond,
            EventKind::PowerupsSpawn,
            EventKind::PowerupsDespawn,
            EventKind::PowerupsPicked,
            EventKind::PowerupsSpawnByCoords,
        ]
    }

    fn handle(&mut self, event: &Event, world: &mut World, sink: &mut EventSink) -> SystemResult {
        match event {
            Event::TimelineClockSecond => self.on_clock_second(world, sink),
            Event::PowerupsSpawn {
                kind,
                x,
                y,
                owner,
                permanent,
            } => self.on_spawn(world, sink, *kind, *x, *y, *owner, *permanent)?,
            Event::PowerupsDespawn { mob } => self.on_despawn(world, sink, *mob)?,
            Event::PowerupsPicked { mob, player } => self.on_picked(world, sink, *mob, *player)?,
            Event::PowerupsSpawnByCoords { x, y } => self.on_spawn_by_coords(world, sink, *x, *y),
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::dispatch::Dispatcher;
    use crate::world::Player;

    fn setup(seed: u64) -> (Dispatcher, World, EventSink) {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Box::new(PowerupsSystem::with_rng(StdRng::seed_from_u64(
            seed,
        ))));
        (
            dispatcher,
            World::new(ServerConfig::default()),
            EventSink::new(),
        )
    }

    fn spawn(kind: PowerupKind, x: f64, y: f64) -> Event {
        Event::PowerupsSpawn {
            kind,
            x,
            y,
            owner: None,
            permanent: false,
        }
    }

    #[test]
    fn test_spawn_inserts_mob_and_occupies_chunk() {
        let (mut dispatcher, mut world, mut sink) = setup(1);
        world.now_ms = 5000;

        dispatcher.dispatch(spawn(PowerupKind::Shield, 100.0, 100.0), &mut world, &mut sink);

        assert_eq!(world.mobs.len(), 1);
        assert_eq!(world.shield_ids.len(), 1);
        let chunk = world.spawn_grid.get(chunk_index(100.0, 100.0)).unwrap();
        assert_eq!(chunk.spawned, 1);
        assert_eq!(chunk.last_ms, 5000);
    }

    #[test]
    fn test_expiry_despawns_and_frees_chunk() {
        let (mut dispatcher, mut world, mut sink) = setup(1);
        world.config.powerup_spawn_chance = 0.0;
        world.now_ms = 1000;

        dispatcher.dispatch(spawn(PowerupKind::Inferno, 100.0, 100.0), &mut world, &mut sink);
        let &mob = world.inferno_ids.iter().next().unwrap();

        world.now_ms = 1000 + POWERUPS_DEFAULT_DESPAWN_MS;
        dispatcher.dispatch(Event::TimelineClockSecond, &mut world, &mut sink);

        assert!(!world.mobs.contains_key(&mob));
        assert_eq!(
            world.spawn_grid.get(chunk_index(100.0, 100.0)).unwrap().spawned,
            0
        );
    }

    #[test]
    fn test_permanent_powerup_never_expires() {
        let (mut dispatcher, mut world, mut sink) = setup(1);
        world.config.powerup_spawn_chance = 0.0;

        dispatcher.dispatch(
            Event::PowerupsSpawn {
                kind: PowerupKind::Upgrade,
                x: 100.0,
                y: 100.0,
                owner: None,
                permanent: true,
            },
            &mut world,
            &mut sink,
        );

        world.now_ms = u64::MAX / 2;
        dispatcher.dispatch(Event::TimelineClockSecond, &mut world, &mut sink);

        assert_eq!(world.mobs.len(), 1);
    }

    #[test]
    fn test_pickup_applies_shield_and_frees_chunk() {
        let (mut dispatcher, mut world, mut sink) = setup(1);

        let player_id = world.player_ids.allocate();
        world.players.insert(
            player_id,
            Player::new(player_id, "pilot".to_string(), "GB".to_string(), 1),
        );
        world.index_player(player_id);

        dispatcher.dispatch(spawn(PowerupKind::Shield, 100.0, 100.0), &mut world, &mut sink);
        let &mob = world.shield_ids.iter().next().unwrap();

        dispatcher.dispatch(
            Event::PowerupsPicked {
                mob,
                player: Some(player_id),
            },
            &mut world,
            &mut sink,
        );

        assert!(world.players.get(&player_id).unwrap().shielded);
        assert!(world.mobs.is_empty());
        assert_eq!(
            world.spawn_grid.get(chunk_index(100.0, 100.0)).unwrap().spawned,
            0
        );
    }

    fn upgrade_mob(world: &World) -> MobId {
        world
            .mobs
            .iter()
            .find_map(|(id, mob)| match mob {
                Mob::Powerup(powerup) if powerup.kind == PowerupKind::Upgrade => Some(*id),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_upgrade_does_not_affect_chunk_occupancy() {
        let (mut dispatcher, mut world, mut sink) = setup(1);
        world.config.powerup_spawn_chance = 0.0;
        let index = chunk_index(100.0, 100.0);

        dispatcher.dispatch(
            Event::PowerupsSpawn {
                kind: PowerupKind::Upgrade,
                x: 100.0,
                y: 100.0,
                owner: None,
                permanent: true,
            },
            &mut world,
            &mut sink,
        );
        assert_eq!(world.spawn_grid.get(index).unwrap().spawned, 0);

        // A shield in the same chunk owns the only occupancy slot; picking
        // up the upgrade must not release it.
        dispatcher.dispatch(spawn(PowerupKind::Shield, 110.0, 110.0), &mut world, &mut sink);
        assert_eq!(world.spawn_grid.get(index).unwrap().spawned, 1);

        let upgrade = upgrade_mob(&world);
        dispatcher.dispatch(
            Event::PowerupsPicked {
                mob: upgrade,
                player: None,
            },
            &mut world,
            &mut sink,
        );

        assert_eq!(world.spawn_grid.get(index).unwrap().spawned, 1);
    }

    #[test]
    fn test_pickup_rechecks_freed_chunk() {
        let (mut dispatcher, mut world, mut sink) = setup(1);
        world.config.powerup_spawn_chance = 1.0;
        world.now_ms = POWERUPS_RESPAWN_TIMEOUT_MS
            + (POWERUPS_SPAWN_GUARANTEED_SEC as u64) * MS_PER_SEC;
        let index = chunk_index(100.0, 100.0);

        dispatcher.dispatch(
            Event::PowerupsSpawn {
                kind: PowerupKind::Upgrade,
                x: 100.0,
                y: 100.0,
                owner: None,
                permanent: true,
            },
            &mut world,
            &mut sink,
        );

        let upgrade = upgrade_mob(&world);
        dispatcher.dispatch(
            Event::PowerupsPicked {
                mob: upgrade,
                player: None,
            },
            &mut world,
            &mut sink,
        );

        // The pickup re-evaluated the chunk immediately; a fresh random
        // powerup replaced the picked one in the same chunk.
        assert_eq!(world.mobs.len(), 1);
        match world.mobs.values().next().unwrap() {
            Mob::Powerup(replacement) => {
                assert_ne!(replacement.kind, PowerupKind::Upgrade);
                assert_eq!(chunk_index(replacement.pos.x, replacement.pos.y), index);
            }
            other => panic!("Unexpected mob: {:?}", other),
        }
    }

    #[test]
    fn test_expiry_waits_for_sweep_instead_of_respawning() {
        let (mut dispatcher, mut world, mut sink) = setup(1);
        world.config.powerup_spawn_chance = 1.0;
        world.now_ms = POWERUPS_RESPAWN_TIMEOUT_MS
            + (POWERUPS_SPAWN_GUARANTEED_SEC as u64) * MS_PER_SEC;

        dispatcher.dispatch(spawn(PowerupKind::Inferno, 100.0, 100.0), &mut world, &mut sink);
        let &mob = world.inferno_ids.iter().next().unwrap();

        // Expiry frees the chunk but leaves the refill to the round-robin
        // sweep, even though the chunk is eligible again.
        world.now_ms += POWERUPS_DEFAULT_DESPAWN_MS;
        dispatcher.dispatch(Event::PowerupsDespawn { mob }, &mut world, &mut sink);

        assert!(world.mobs.is_empty());
    }

    #[test]
    fn test_round_robin_sweep_wraps() {
        let (mut dispatcher, mut world, mut sink) = setup(1);
        world.config.powerup_spawn_chance = 0.0;

        // A full sweep plus one: the cursor must be back past the first
        // chunk without ever touching an out-of-range index.
        for _ in 0..=POWERUPS_GRID_CHUNKS {
            dispatcher.dispatch(Event::TimelineClockSecond, &mut world, &mut sink);
        }

        assert!(world.mobs.is_empty());
    }

    #[test]
    fn test_guaranteed_spawn_after_window() {
        let (mut dispatcher, mut world, mut sink) = setup(1);
        world.config.powerup_spawn_chance = 1.0;
        world.now_ms = POWERUPS_RESPAWN_TIMEOUT_MS
            + (POWERUPS_SPAWN_GUARANTEED_SEC as u64) * MS_PER_SEC;

        // Chunk 1 is evaluated on the first second of the sweep.
        dispatcher.dispatch(Event::TimelineClockSecond, &mut world, &mut sink);

        assert_eq!(world.mobs.len(), 1);
        assert_eq!(world.spawn_grid.get(1).unwrap().spawned, 1);
    }
}
