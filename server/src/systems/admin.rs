//! Read-only admin queries and privileged commands.

use crate::constants::{CONNECTIONS_FLOOD_BAN_MS, LIMITS_SU};
use crate::dispatch::{Event, EventKind, EventSink, System, SystemResult};
use crate::relay::{
    ActionPlayer, ConnectionId, PlayerId, PlayersListItem, Recipients, SimCommand,
};
use crate::world::{AliveStatus, World};
use log::info;
use shared::{marshal_server_message, ServerPacket, ERROR_UNKNOWN_COMMAND};

/// Commands owned by other systems; everything else answered here.
const DELEGATED_COMMANDS: [&str; 2] = ["respawn", "spectate"];

#[derive(Default)]
pub struct AdminSystem;

impl AdminSystem {
    pub fn new() -> Self {
        Self
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

    fn players_list(&self, world: &World) -> Vec<PlayersListItem> {
        let now = world.now_ms;
        let mut list: Vec<PlayersListItem> = world
            .players
            .values()
            .map(|player| PlayersListItem {
                id: player.id,
                name: player.name.clone(),
                captures: player.stats.captures,
                kills: player.stats.kills,
                deaths: player.stats.deaths,
                score: player.stats.score,
                last_move: player.times.last_move,
                ping: player.ping,
                flag: player.flag.clone(),
                is_spectate: player.alive == AliveStatus::Spectating,
                is_muted: player.is_muted(now),
                is_bot: player.is_bot,
            })
            .collect();

        list.sort_unstable_by_key(|item| item.id);
        list
    }

    fn get_player(&self, world: &World, player_id: PlayerId) -> Option<ActionPlayer> {
        let player = world.players.get(&player_id)?;
        let ip = world
            .connections
            .get(player.connection)
            .map(|meta| meta.ip.clone())
            .unwrap_or_default();

        Some(ActionPlayer {
            id: player.id,
            name: player.name.clone(),
            ip,
        })
    }

    fn on_command(
        &mut self,
        world: &mut World,
        sink: &mut EventSink,
        connection: ConnectionId,
        com: &str,
        data: &str,
    ) -> SystemResult {
        if DELEGATED_COMMANDS.contains(&com) {
            return Ok(());
        }

        let is_superuser = match world.connections.get_mut(connection) {
            Some(meta) => {
                meta.limits.su += 1;

                if meta.limits.su > LIMITS_SU {
                    return Ok(());
                }

                meta.player_id
                    .and_then(|id| world.players.get(&id))
                    .map(|player| player.is_superuser)
                    .unwrap_or(false)
            }
            None => return Ok(()),
        };

        match com {
            "ban" if is_superuser => {
                let ip = data.trim();
                if !ip.is_empty() {
                    info!("Admin ban of {} from connection {}", ip, connection);
                    sink.emit(Event::ConnectionsBanIp {
                        ip: ip.to_string(),
                        duration_ms: CONNECTIONS_FLOOD_BAN_MS,
                        flood: false,
                    });
                }
            }
            "unban" if is_superuser => {
                let ip = data.trim();
                if !ip.is_empty() {
                    sink.emit(Event::ConnectionsUnbanIp { ip: ip.to_string() });
                }
            }
            "kick" if is_superuser => {
                if let Ok(target) = data.trim().parse::<PlayerId>() {
                    sink.emit(Event::PlayersKick { player: target });
                }
            }
            _ => {
                self.send_to(
                    sink,
                    connection,
                    &ServerPacket::Error {
                        code: ERROR_UNKNOWN_COMMAND,
                    },
                )?;
            }
        }

        Ok(())
    }
}

impl System for AdminSystem {
    fn name(&self) -> &'static str {
        "admin"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::AdminPlayersList,
            EventKind::AdminGetPlayer,
            EventKind::RouteCommand,
        ]
    }

    fn handle(&mut self, event: &Event, world: &mut World, sink: &mut EventSink) -> SystemResult {
        match event {
            Event::AdminPlayersList => {
                let list = self.players_list(world);
                sink.send(SimCommand::PlayersListResponse { list });
            }
            Event::AdminGetPlayer { player } => {
                let player = self.get_player(world, *player);
                sink.send(SimCommand::PlayerResponse { player });
            }
            Event::RouteCommand {
                connection,
                com,
                data,
            } => self.on_command(world, sink, *connection, com, data)?,
            _ => {}
        }

        Ok(())
    }
}
