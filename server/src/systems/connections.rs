//! Connection lifecycle: open/close bookkeeping, packet routing, timers,
//! rate limiting and IP bans.

use crate::connection::{BanReason, ConnectionMeta, ConnectionStatus, TimerKind};
use crate::constants::*;
use crate::dispatch::{Channel, Event, EventKind, EventSink, LoginMessage, System, SystemResult};
use crate::relay::{ConnectionId, Recipients, SimCommand};
use crate::world::World;
use log::{debug, info, warn};
use shared::{
    marshal_server_message, unmarshal_client_message, ClientPacket, ServerPacket, ERROR_BANNED,
    ERROR_INCORRECT_PROTOCOL, ERROR_INVALID_LOGIN_DATA, ERROR_PACKET_FLOODING_BAN,
};

#[derive(Default)]
pub struct ConnectionsSystem {
    ping_num: u32,
}

impl ConnectionsSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn send_to(
        &self,
        sink: &mut EventSink,
        connection: ConnectionId,
        packet: &ServerPacket,
    ) -> SystemResult {
        let frame = marshal_server_message(packet)?;
        sink.send(SimCommand::SendPackets {
            frame,
            recipients: Recipients::One(connection),
            exceptions: None,
        });
        Ok(())
    }

    fn close(&self, sink: &mut EventSink, connection: ConnectionId) {
        sink.send(SimCommand::CloseConnection { connection });
    }

    fn on_opened(&mut self, world: &mut World, sink: &mut EventSink, meta: &crate::relay::OpenedConnection) -> SystemResult {
        let now = world.now_ms;

        if let Some(ban) = world.connections.active_ban(&meta.ip, now) {
            info!("Connection {} from banned IP {}", meta.id, meta.ip);
            sink.emit(Event::ResponsePlayerBan {
                connection: meta.id,
                flood: ban.reason == BanReason::PacketFlooding,
            });
            return Ok(());
        }

        let per_ip_limit = world.config.max_players_per_ip
            * CONNECTIONS_PLAYERS_TO_CONNECTIONS_MULTIPLIER;

        if !world.connections.is_whitelisted(&meta.ip)
            && world.connections.connections_from_ip(&meta.ip) >= per_ip_limit
        {
            info!("Connection limit reached for IP {}", meta.ip);
            self.close(sink, meta.id);
            return Ok(());
        }

        let mut mirror = ConnectionMeta::new(meta.id, meta.ip.clone(), meta.headers.clone(), now);
        mirror.status = ConnectionStatus::Established;
        mirror.timers.set(TimerKind::Login, now + CONNECTIONS_LOGIN_TIMEOUT_MS);

        world.connections.track_ip(&meta.ip);
        world.connections.insert(mirror);

        debug!("Connection {} opened from {}", meta.id, meta.ip);
        Ok(())
    }

    fn on_packet(
        &mut self,
        world: &mut World,
        sink: &mut EventSink,
        connection: ConnectionId,
        frame: &[u8],
    ) -> SystemResult {
        let now = world.now_ms;
        let (ip, player_id) = {
            let meta = match world.connections.get_mut(connection) {
                Some(meta) => meta,
                None => return Ok(()),
            };

            meta.last_packet_at = now;
            meta.lagging = false;
            meta.limits.any += 1;

            (meta.ip.clone(), meta.player_id)
        };

        let whitelisted = world.connections.is_whitelisted(&ip);

        if !whitelisted {
            let flooding = world
                .connections
                .get(connection)
                .map(|meta| meta.limits.is_flooding())
                .unwrap_or(false);

            if flooding {
                warn!("Packet flooding from {} (connection {})", ip, connection);
                sink.emit(Event::ConnectionsBanIp {
                    ip,
                    duration_ms: CONNECTIONS_FLOOD_BAN_MS,
                    flood: true,
                });
                sink.emit(Event::ResponsePlayerBan {
                    connection,
                    flood: true,
                });
                return Ok(());
            }
        }

        let packet = match unmarshal_client_message(frame) {
            Ok(packet) => packet,
            Err(err) => {
                debug!("Undecodable frame on connection {}: {}", connection, err);
                self.close(sink, connection);
                return Ok(());
            }
        };

        if matches!(
            packet,
            ClientPacket::Chat { .. }
                | ClientPacket::TeamChat { .. }
                | ClientPacket::Whisper { .. }
                | ClientPacket::Say { .. }
        ) {
            let over_limit = match world.connections.get_mut(connection) {
                Some(meta) => {
                    meta.limits.chat += 1;
                    meta.limits.chat > LIMITS_CHAT
                }
                None => return Ok(()),
            };

            if over_limit && !whitelisted {
                debug!("Chat rate limit hit on connection {}", connection);
                return Ok(());
            }

            let player = match player_id {
                Some(player) => player,
                None => return Ok(()),
            };

            let event = match packet {
                ClientPacket::Chat { text } => Event::ChatPublic { player, text },
                ClientPacket::TeamChat { text } => Event::ChatTeam { player, text },
                ClientPacket::Whisper { to, text } => Event::ChatWhisper { player, to, text },
                ClientPacket::Say { text } => Event::ChatSay { player, text },
                _ => unreachable!(),
            };

            sink.to_channel(Channel::Chat, event);
            return Ok(());
        }

        match packet {
            ClientPacket::Login {
                protocol,
                name,
                session,
                flag,
            } => {
                sink.emit(Event::RouteLogin {
                    connection,
                    message: LoginMessage {
                        protocol,
                        name,
                        session,
                        flag,
                    },
                });
            }
            ClientPacket::Backup { token: _ } => {
                if let Some(meta) = world.connections.get_mut(connection) {
                    meta.is_backup = true;
                    meta.timers.cancel(TimerKind::Backup);
                }
            }
            ClientPacket::Ack => {
                if let Some(meta) = world.connections.get_mut(connection) {
                    meta.timers.cancel(TimerKind::Ack);
                    meta.timers.set(TimerKind::Ping, now + CONNECTIONS_PING_INTERVAL_MS);
                }
            }
            ClientPacket::Pong { num: _ } => {
                if let Some(meta) = world.connections.get_mut(connection) {
                    meta.timers.cancel(TimerKind::Lagging);
                    meta.timers.set(TimerKind::Ping, now + CONNECTIONS_PING_INTERVAL_MS);
                }
            }
            ClientPacket::Key {
                sequence: _,
                key,
                pressed,
            } => {
                let over_limit = match world.connections.get_mut(connection) {
                    Some(meta) => {
                        meta.limits.key += 1;
                        meta.limits.key > LIMITS_KEY
                    }
                    None => return Ok(()),
                };

                if over_limit && !whitelisted {
                    sink.emit(Event::ConnectionsKick { connection });
                    return Ok(());
                }

                if let Some(player) = player_id.and_then(|id| world.players.get_mut(&id)) {
                    if pressed {
                        player.keystate |= 1 << (key & 7);
                    } else {
                        player.keystate &= !(1 << (key & 7));
                    }
                    player.times.last_move = now;
                }
            }
            ClientPacket::Command { com, data } => {
                sink.emit(Event::RouteCommand {
                    connection,
                    com,
                    data,
                });
            }
            // Chat flavors were handled above.
            _ => {}
        }

        Ok(())
    }

    fn on_closed(&mut self, world: &mut World, sink: &mut EventSink, connection: ConnectionId) {
        if let Some(meta) = world.connections.remove(connection) {
            debug!("Connection {} from {} closed", connection, meta.ip);

            if meta.is_main {
                if let Some(player) = meta.player_id {
                    sink.emit(Event::PlayersRemove { player });
                }
            }
        }
    }
}

impl System for ConnectionsSystem {
    fn name(&self) -> &'static str {
        "connections"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::ConnectionOpened,
            EventKind::PacketReceived,
            EventKind::ConnectionClosed,
            EventKind::TimeoutLogin,
            EventKind::TimeoutAck,
            EventKind::TimeoutBackup,
            EventKind::TimeoutPing,
            EventKind::TimeoutLagging,
            EventKind::ResponsePlayerBan,
            EventKind::ErrorsIncorrectProtocol,
            EventKind::ErrorsInvalidLogin,
            EventKind::ConnectionsBanIp,
            EventKind::ConnectionsUnbanIp,
            EventKind::ConnectionsKick,
            EventKind::TimelineClockSecond,
        ]
    }

    fn handle(&mut self, event: &Event, world: &mut World, sink: &mut EventSink) -> SystemResult {
        match event {
            Event::ConnectionOpened { meta } => self.on_opened(world, sink, meta)?,
            Event::PacketReceived { connection, frame } => {
                self.on_packet(world, sink, *connection, frame)?
            }
            Event::ConnectionClosed { connection } => self.on_closed(world, sink, *connection),

            Event::TimeoutLogin { connection } => {
                debug!("Login timeout on connection {}", connection);
                self.close(sink, *connection);
            }
            Event::TimeoutAck { connection } => {
                debug!("Ack timeout on connection {}", connection);
                self.close(sink, *connection);
            }
            Event::TimeoutBackup { connection } => {
                debug!("Backup token timeout on connection {}", connection);
                self.close(sink, *connection);
            }
            Event::TimeoutPing { connection } => {
                let now = world.now_ms;
                self.ping_num = self.ping_num.wrapping_add(1);
                let num = self.ping_num;

                if let Some(meta) = world.connections.get_mut(*connection) {
                    meta.timers.set(TimerKind::Lagging, now + CONNECTIONS_LAG_DETECT_MS);
                    meta.timers.set(TimerKind::Ping, now + CONNECTIONS_PING_INTERVAL_MS);
                    self.send_to(sink, *connection, &ServerPacket::Ping { clock: now, num })?;
                }
            }
            Event::TimeoutLagging { connection } => {
                if let Some(meta) = world.connections.get_mut(*connection) {
                    meta.lagging = true;
                    debug!("Connection {} is lagging", connection);
                }
            }

            Event::ResponsePlayerBan { connection, flood } => {
                let code = if *flood {
                    ERROR_PACKET_FLOODING_BAN
                } else {
                    ERROR_BANNED
                };
                self.send_to(sink, *connection, &ServerPacket::Error { code })?;
                self.close(sink, *connection);
            }
            Event::ErrorsIncorrectProtocol { connection } => {
                self.send_to(
                    sink,
                    *connection,
                    &ServerPacket::Error {
                        code: ERROR_INCORRECT_PROTOCOL,
                    },
                )?;
                self.close(sink, *connection);
            }
            Event::ErrorsInvalidLogin { connection } => {
                self.send_to(
                    sink,
                    *connection,
                    &ServerPacket::Error {
                        code: ERROR_INVALID_LOGIN_DATA,
                    },
                )?;
                self.close(sink, *connection);
            }

            Event::ConnectionsBanIp {
                ip,
                duration_ms,
                flood,
            } => {
                let reason = if *flood {
                    BanReason::PacketFlooding
                } else {
                    BanReason::Generic
                };
                let expire = world.now_ms + duration_ms;
                world.connections.ban_ip(ip, expire, reason);
                info!("IP {} banned until {}", ip, expire);
            }
            Event::ConnectionsUnbanIp { ip } => {
                if world.connections.unban_ip(ip) {
                    info!("IP {} unbanned", ip);
                }
            }
            Event::ConnectionsKick { connection } => {
                if let Some(player) = world
                    .connections
                    .get(*connection)
                    .and_then(|meta| meta.player_id)
                {
                    sink.emit(Event::PlayersKick { player });
                } else {
                    self.close(sink, *connection);
                }
            }

            Event::TimelineClockSecond => {
                let ids: Vec<ConnectionId> =
                    world.connections.iter().map(|meta| meta.id).collect();
                for id in ids {
                    if let Some(meta) = world.connections.get_mut(id) {
                        meta.limits.decay();
                    }
                }
            }

            _ => {}
        }

        Ok(())
    }
}
