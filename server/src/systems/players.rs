//! Player lifecycle: creation from queued login requests, removal, kicks,
//! death and respawn.

use crate::connection::TimerKind;
use crate::constants::*;
use crate::dispatch::{Event, EventKind, EventSink, System, SystemResult};
use crate::relay::{ConnectionId, PlayerId, Recipients, SimCommand};
use crate::support::get_random_int;
use crate::world::{AliveStatus, Player, World};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{marshal_server_message, ServerPacket, Vector2};

/// Margin kept between a spawn point and the map edge.
const SPAWN_EDGE_MARGIN: f64 = 1024.0;

pub struct PlayersSystem {
    rng: StdRng,
}

impl PlayersSystem {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    #[cfg(test)]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn spawn_position(&mut self) -> Vector2 {
        let half_w = (MAP_WIDTH / 2.0 - SPAWN_EDGE_MARGIN) as i64;
        let half_h = (MAP_HEIGHT / 2.0 - SPAWN_EDGE_MARGIN) as i64;

        Vector2::new(
            get_random_int(&mut self.rng, -half_w, half_w) as f64,
            get_random_int(&mut self.rng, -half_h, half_h) as f64,
        )
    }

    fn broadcast(&self, world: &World, sink: &mut EventSink, packet: &ServerPacket, except: Option<ConnectionId>) -> SystemResult {
        let recipients = world.broadcast_connections();

        if recipients.is_empty() {
            return Ok(());
        }

        let frame = marshal_server_message(packet)?;
        sink.send(SimCommand::SendPackets {
            frame,
            recipients: Recipients::Many(recipients),
            exceptions: except.map(|connection| vec![connection]),
        });
        Ok(())
    }

    fn send_to(&self, sink: &mut EventSink, connection: ConnectionId, packet: &ServerPacket) -> SystemResult {
        let frame = marshal_server_message(packet)?;
        sink.send(SimCommand::SendPackets {
            frame,
            recipients: Recipients::One(connection),
            exceptions: None,
        });
        Ok(())
    }

    fn on_create(
        &mut self,
        world: &mut World,
        sink: &mut EventSink,
        connection: ConnectionId,
        name: &str,
        flag: &str,
        is_bot: bool,
    ) -> SystemResult {
        // The connection may have died while the request sat on the
        // connect channel.
        if !world.connections.contains(connection) {
            return Ok(());
        }

        // The kick queued by a name collision runs before this request, but
        // an unrelated create may still have raced us to the name.
        if world.players_by_name.contains_key(name) {
            sink.emit(Event::ErrorsInvalidLogin { connection });
            return Ok(());
        }

        let id = world.player_ids.allocate();
        let now = world.now_ms;
        let pos = self.spawn_position();

        let mut player = Player::new(id, name.to_string(), flag.to_string(), connection);
        player.pos = pos;
        player.is_bot = is_bot;
        player.times.last_move = now;
        let team = player.team;

        world.players.insert(id, player);
        world.index_player(id);

        if let Some(meta) = world.connections.get_mut(connection) {
            meta.player_id = Some(id);
            meta.team_id = Some(team);
            meta.is_main = true;
            meta.is_bot = is_bot;
            meta.pending.login = false;
            meta.timers.set(TimerKind::Ack, now + CONNECTIONS_ACK_TIMEOUT_MS);
            meta.timers.set(TimerKind::Backup, now + CONNECTIONS_BACKUP_TIMEOUT_MS);
        }

        info!("Player {} ({}) joined on connection {}", id, name, connection);

        self.send_to(
            sink,
            connection,
            &ServerPacket::LoginAccepted {
                player_id: id,
                team,
                clock: now,
            },
        )?;

        self.broadcast(
            world,
            sink,
            &ServerPacket::PlayerNew {
                id,
                name: name.to_string(),
                team,
                flag: flag.to_string(),
                pos_x: pos.x,
                pos_y: pos.y,
            },
            Some(connection),
        )?;

        sink.emit(Event::PlayersCreated { player: id });
        Ok(())
    }

    fn on_remove(&mut self, world: &mut World, sink: &mut EventSink, player_id: PlayerId) -> SystemResult {
        let player = match world.remove_player(player_id) {
            Some(player) => player,
            None => return Ok(()),
        };

        if let Some(meta) = world.connections.get_mut(player.connection) {
            meta.player_id = None;
            meta.team_id = None;
            meta.is_main = false;
            meta.timers.cancel(TimerKind::Respawn);
        }

        info!("Player {} ({}) removed", player_id, player.name);

        self.broadcast(world, sink, &ServerPacket::PlayerLeave { id: player_id }, None)?;
        sink.emit(Event::PlayersRemoved { player: player_id });
        Ok(())
    }

    fn on_death(
        &mut self,
        world: &mut World,
        sink: &mut EventSink,
        victim: PlayerId,
        killer: Option<PlayerId>,
    ) -> SystemResult {
        let (connection, pos) = {
            let player = match world.players.get_mut(&victim) {
                Some(player) => player,
                None => return Ok(()),
            };

            if player.alive != AliveStatus::Alive {
                return Ok(());
            }

            player.alive = AliveStatus::Dead;
            player.stats.deaths += 1;
            (player.connection, player.pos)
        };

        if let Some(killer_id) = killer {
            if let Some(killer_player) = world.players.get_mut(&killer_id) {
                killer_player.stats.kills += 1;
                killer_player.stats.score += 25;
            }
        }

        if let Some(meta) = world.connections.get_mut(connection) {
            meta.timers
                .set(TimerKind::Respawn, world.now_ms + PLAYERS_RESPAWN_DELAY_MS);
        }

        self.broadcast(
            world,
            sink,
            &ServerPacket::PlayerKill {
                id: victim,
                killer: killer.unwrap_or(0),
                pos_x: pos.x,
                pos_y: pos.y,
            },
            None,
        )?;

        Ok(())
    }

    fn on_respawn(&mut self, world: &mut World, sink: &mut EventSink, connection: ConnectionId) -> SystemResult {
        let player_id = match world
            .connections
            .get(connection)
            .and_then(|meta| meta.player_id)
        {
            Some(id) => id,
            None => return Ok(()),
        };

        let pos = self.spawn_position();

        {
            let player = match world.players.get_mut(&player_id) {
                Some(player) => player,
                None => return Ok(()),
            };

            player.alive = AliveStatus::Alive;
            player.health = 1.0;
            player.shielded = false;
            player.pos = pos;
            player.velocity = Vector2::default();
            player.keystate = 0;
        }

        debug!("Player {} respawned", player_id);

        self.broadcast(
            world,
            sink,
            &ServerPacket::PlayerRespawn {
                id: player_id,
                pos_x: pos.x,
                pos_y: pos.y,
            },
            None,
        )?;

        Ok(())
    }

    fn on_command(
        &mut self,
        world: &mut World,
        _sink: &mut EventSink,
        connection: ConnectionId,
        com: &str,
    ) -> SystemResult {
        match com {
            "respawn" => {
                let now = world.now_ms;
                if let Some(meta) = world.connections.get_mut(connection) {
                    meta.limits.respawn += 1;

                    if meta.limits.respawn > LIMITS_RESPAWN {
                        return Ok(());
                    }

                    if meta.player_id.is_some() && !meta.timers.is_set(TimerKind::Respawn) {
                        // Fires on the next tick.
                        meta.timers.set(TimerKind::Respawn, now);
                    }
                }
            }
            "spectate" => {
                let player_id = match world.connections.get_mut(connection) {
                    Some(meta) => {
                        meta.limits.spectate += 1;

                        if meta.limits.spectate > LIMITS_SPECTATE {
                            return Ok(());
                        }

                        meta.player_id
                    }
                    None => None,
                };

                if let Some(id) = player_id {
                    if let Some(player) = world.players.get_mut(&id) {
                        player.alive = AliveStatus::Spectating;
                        world.spectator_ids.insert(id);
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }
}

impl System for PlayersSystem {
    fn name(&self) -> &'static str {
        "players"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::PlayersCreate,
            EventKind::PlayersRemove,
            EventKind::PlayersKick,
            EventKind::PlayersDeath,
            EventKind::TimeoutRespawn,
            EventKind::RouteCommand,
        ]
    }

    fn handle(&mut self, event: &Event, world: &mut World, sink: &mut EventSink) -> SystemResult {
        match event {
            Event::PlayersCreate {
                connection,
                name,
                flag,
                is_bot,
            } => self.on_create(world, sink, *connection, name, flag, *is_bot)?,
            Event::PlayersRemove { player } => self.on_remove(world, sink, *player)?,
            Event::PlayersKick { player } => {
                if let Some(connection) = world.player_connection(*player) {
                    sink.send(SimCommand::CloseConnection { connection });
                }
                sink.emit(Event::PlayersRemove { player: *player });
            }
            Event::PlayersDeath { victim, killer } => {
                self.on_death(world, sink, *victim, *killer)?
            }
            Event::TimeoutRespawn { connection } => self.on_respawn(world, sink, *connection)?,
            Event::RouteCommand {
                connection, com, ..
            } => self.on_command(world, sink, *connection, com)?,
            _ => {}
        }

        Ok(())
    }
}
