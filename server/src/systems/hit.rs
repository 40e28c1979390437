//! Applies resolved damage to players and raises deaths.

use crate::combat::{self, Hit, Victim};
use crate::constants::PLAYERS_HEALTH_MIN;
use crate::dispatch::{Event, EventKind, EventSink, System, SystemResult};
use crate::relay::{MobId, PlayerId, Recipients, SimCommand};
use crate::world::{AliveStatus, Mob, World};
use shared::{marshal_server_message, ServerPacket};

#[derive(Default)]
pub struct HitSystem;

impl HitSystem {
    pub fn new() -> Self {
        Self
    }

    fn on_hit(
        &mut self,
        world: &mut World,
        sink: &mut EventSink,
        victim_id: PlayerId,
        projectile_id: Option<MobId>,
        flat_damage: f64,
    ) -> SystemResult {
        let victim = match world.players.get(&victim_id) {
            Some(player) if player.alive == AliveStatus::Alive => Victim {
                health_fraction: player.health,
                velocity: player.velocity,
                shielded: player.shielded,
                plane: player.plane,
                defense_level: player.upgrades.defense,
            },
            _ => return Ok(()),
        };

        // A projectile hit consumes the projectile whether or not it dealt
        // damage through a shield.
        let (hit, owner) = match projectile_id {
            Some(mob_id) => match world.remove_mob(mob_id) {
                Some(Mob::Projectile(projectile)) => (
                    Hit::Projectile {
                        projectile: projectile.projectile_type,
                        velocity: projectile.velocity,
                        double_damage: projectile.double_damage,
                    },
                    projectile.owner,
                ),
                // Unknown or non-projectile mob id: already consumed by a
                // concurrent hit this tick.
                _ => return Ok(()),
            },
            None => (Hit::Flat(flat_damage), None),
        };

        let new_health = combat::resolve(&victim, &hit);
        let took_damage = new_health < victim.health_fraction;

        {
            let player = match world.players.get_mut(&victim_id) {
                Some(player) => player,
                None => return Ok(()),
            };
            player.health = new_health;
            if took_damage {
                player.times.last_hit = world.now_ms;
                player.stats.hits_received += 1;
            }
        }

        if took_damage {
            if let Some(owner_id) = owner {
                if owner_id != victim_id {
                    if let Some(owner_player) = world.players.get_mut(&owner_id) {
                        owner_player.stats.hits_dealt += 1;
                        owner_player.stats.damage_dealt +=
                            ((victim.health_fraction - new_health) * 100.0) as u64;
                    }
                }
            }
        }

        let recipients = world.broadcast_connections();
        if !recipients.is_empty() {
            let frame = marshal_server_message(&ServerPacket::PlayerHit {
                id: victim_id,
                health: new_health,
                projectile: projectile_id.unwrap_or(0),
            })?;
            sink.send(SimCommand::SendPackets {
                frame,
                recipients: Recipients::Many(recipients),
                exceptions: None,
            });
        }

        if new_health <= PLAYERS_HEALTH_MIN {
            sink.emit(Event::PlayersDeath {
                victim: victim_id,
                killer: owner,
            });
        }

        Ok(())
    }
}

impl System for HitSystem {
    fn name(&self) -> &'static str {
        "hit"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::PlayersHit]
    }

    fn handle(&mut self, event: &Event, world: &mut World, sink: &mut EventSink) -> SystemResult {
        if let Event::PlayersHit {
            victim,
            projectile,
            flat_damage,
        } = event
        {
            self.on_hit(world, sink, *victim, *projectile, *flat_damage)?;
        }

        Ok(())
    }
}
