//! Chat delivery over the rate-limited chat channel.
//!
//! Incoming chat packets are parked on the chat channel by the packet
//! router. This system drives the flush: at most one queued message leaves
//! the channel every few ticks, oldest first, so a burst drains over
//! multiple ticks instead of flooding every client at once.

use crate::constants::CHAT_MESSAGE_PER_TICKS_LIMIT;
use crate::dispatch::{Channel, Event, EventKind, EventSink, System, SystemResult};
use crate::relay::{ConnectionId, PlayerId, Recipients, SimCommand};
use crate::world::{AliveStatus, World};
use log::debug;
use shared::{marshal_server_message, ServerPacket};

#[derive(Default)]
pub struct ChatSystem {
    frames_passed: u32,
}

impl ChatSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn send_many(
        &self,
        sink: &mut EventSink,
        recipients: Vec<ConnectionId>,
        packet: &ServerPacket,
    ) -> SystemResult {
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

    fn send_to(&self, sink: &mut EventSink, connection: ConnectionId, packet: &ServerPacket) -> SystemResult {
        let frame = marshal_server_message(packet)?;
        sink.send(SimCommand::SendPackets {
            frame,
            recipients: Recipients::One(connection),
            exceptions: None,
        });
        Ok(())
    }

    /// Sender must exist and not be muted; returns None to drop the message.
    fn speaking_player(&self, world: &World, player_id: PlayerId) -> Option<()> {
        let player = world.players.get(&player_id)?;

        if player.is_muted(world.now_ms) {
            debug!("Dropping chat from muted player {}", player_id);
            return None;
        }

        Some(())
    }

    fn on_public(&mut self, world: &mut World, sink: &mut EventSink, player: PlayerId, text: &str) -> SystemResult {
        if self.speaking_player(world, player).is_none() {
            return Ok(());
        }

        self.send_many(
            sink,
            world.broadcast_connections(),
            &ServerPacket::ChatPublic {
                id: player,
                text: text.to_string(),
            },
        )
    }

    fn on_team(&mut self, world: &mut World, sink: &mut EventSink, player: PlayerId, text: &str) -> SystemResult {
        if self.speaking_player(world, player).is_none() {
            return Ok(());
        }

        let team = match world.players.get(&player) {
            Some(p) => p.team,
            None => return Ok(()),
        };

        self.send_many(
            sink,
            world.team_connections(team),
            &ServerPacket::ChatTeam {
                id: player,
                text: text.to_string(),
            },
        )
    }

    fn on_say(&mut self, world: &mut World, sink: &mut EventSink, player: PlayerId, text: &str) -> SystemResult {
        if self.speaking_player(world, player).is_none() {
            return Ok(());
        }

        let (alive, connection) = match world.players.get(&player) {
            Some(p) => (p.alive, p.connection),
            None => return Ok(()),
        };

        // Say bubbles render above the plane; only a live plane can speak.
        if alive != AliveStatus::Alive {
            return self.send_to(
                sink,
                connection,
                &ServerPacket::CommandReply {
                    text: "You must be alive to use /say".to_string(),
                },
            );
        }

        self.send_many(
            sink,
            world.broadcast_connections(),
            &ServerPacket::ChatSay {
                id: player,
                text: text.to_string(),
            },
        )
    }

    fn on_whisper(
        &mut self,
        world: &mut World,
        sink: &mut EventSink,
        player: PlayerId,
        to: PlayerId,
        text: &str,
    ) -> SystemResult {
        if self.speaking_player(world, player).is_none() {
            return Ok(());
        }

        let sender = match world.player_connection(player) {
            Some(connection) => connection,
            None => return Ok(()),
        };

        let recipient = match world.player_connection(to) {
            Some(connection) => connection,
            None => {
                return self.send_to(
                    sink,
                    sender,
                    &ServerPacket::CommandReply {
                        text: "Unknown player".to_string(),
                    },
                );
            }
        };

        let packet = ServerPacket::ChatWhisper {
            from: player,
            to,
            text: text.to_string(),
        };

        // Both ends see the whisper; one frame covers a self-whisper.
        let recipients = if sender == recipient {
            vec![sender]
        } else {
            vec![sender, recipient]
        };

        self.send_many(sink, recipients, &packet)
    }
}

impl System for ChatSystem {
    fn name(&self) -> &'static str {
        "chat"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[
            EventKind::ChatEmitDelayed,
            EventKind::ChatPublic,
            EventKind::ChatTeam,
            EventKind::ChatSay,
            EventKind::ChatWhisper,
        ]
    }

    fn handle(&mut self, event: &Event, world: &mut World, sink: &mut EventSink) -> SystemResult {
        match event {
            Event::ChatEmitDelayed => {
                self.frames_passed += 1;

                if self.frames_passed >= CHAT_MESSAGE_PER_TICKS_LIMIT {
                    self.frames_passed = 0;
                    sink.emit_first_delayed(Channel::Chat);
                }
            }
            Event::ChatPublic { player, text } => self.on_public(world, sink, *player, text)?,
            Event::ChatTeam { player, text } => self.on_team(world, sink, *player, text)?,
            Event::ChatSay { player, text } => self.on_say(world, sink, *player, text)?,
            Event::ChatWhisper { player, to, text } => {
                self.on_whisper(world, sink, *player, *to, text)?
            }
            _ => {}
        }

        Ok(())
    }
}
