//! Protocol boundary shared by the game server and its clients.
//!
//! The server core treats the wire format as opaque: packets enter and leave
//! through [`marshal_server_message`] and [`unmarshal_client_message`], and
//! everything in between works with the typed enums defined here. Swapping the
//! encoding only touches this crate.

use serde::{Deserialize, Serialize};

/// Upper bound (exclusive) of the connection/mob identifier domain.
/// Identifier `0` is reserved as invalid.
pub const MAX_ID: u32 = u32::MAX;

/// Error codes sent to clients inside [`ServerPacket::Error`].
pub const ERROR_PACKET_FLOODING_BAN: u8 = 1;
pub const ERROR_BANNED: u8 = 2;
pub const ERROR_INCORRECT_PROTOCOL: u8 = 3;
pub const ERROR_INVALID_LOGIN_DATA: u8 = 4;
pub const ERROR_UNKNOWN_COMMAND: u8 = 5;

/// Despawn reasons carried by [`ServerPacket::MobDespawn`].
pub const DESPAWN_TYPE_EXPIRED: u8 = 0;
pub const DESPAWN_TYPE_PICKUP: u8 = 1;

/// A vector in 2D world space.
///
/// Positive x is to the right, positive y is down (screen coordinates).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Vector2 {
    pub x: f64,
    pub y: f64,
}

impl Vector2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Returns the magnitude of the vector.
    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Returns the dot product with another vector.
    pub fn dot(&self, other: &Vector2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn scale(&self, scalar: f64) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

/// Packets received from clients.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum ClientPacket {
    Login {
        protocol: u8,
        name: String,
        session: String,
        flag: String,
    },
    Backup {
        token: String,
    },
    Ack,
    Pong {
        num: u32,
    },
    Key {
        sequence: u32,
        key: u8,
        pressed: bool,
    },
    Chat {
        text: String,
    },
    TeamChat {
        text: String,
    },
    Whisper {
        to: u32,
        text: String,
    },
    Say {
        text: String,
    },
    Command {
        com: String,
        data: String,
    },
}

/// Packets sent by the server.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum ServerPacket {
    LoginAccepted {
        player_id: u32,
        team: u32,
        clock: u64,
    },
    Error {
        code: u8,
    },
    PlayerNew {
        id: u32,
        name: String,
        team: u32,
        flag: String,
        pos_x: f64,
        pos_y: f64,
    },
    PlayerLeave {
        id: u32,
    },
    PlayerHit {
        id: u32,
        health: f64,
        projectile: u32,
    },
    PlayerKill {
        id: u32,
        killer: u32,
        pos_x: f64,
        pos_y: f64,
    },
    PlayerRespawn {
        id: u32,
        pos_x: f64,
        pos_y: f64,
    },
    MobSpawn {
        id: u32,
        mob_type: u8,
        pos_x: f64,
        pos_y: f64,
    },
    MobDespawn {
        id: u32,
        despawn_type: u8,
    },
    ChatPublic {
        id: u32,
        text: String,
    },
    ChatTeam {
        id: u32,
        text: String,
    },
    ChatSay {
        id: u32,
        text: String,
    },
    ChatWhisper {
        from: u32,
        to: u32,
        text: String,
    },
    CommandReply {
        text: String,
    },
    Ping {
        clock: u64,
        num: u32,
    },
}

/// Encodes a server packet into an opaque binary frame.
pub fn marshal_server_message(packet: &ServerPacket) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(packet)
}

/// Decodes an opaque binary frame received from a client.
pub fn unmarshal_client_message(frame: &[u8]) -> Result<ClientPacket, bincode::Error> {
    bincode::deserialize(frame)
}

/// Client-side helpers, used by bots and the test suite.
pub fn marshal_client_message(packet: &ClientPacket) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(packet)
}

pub fn unmarshal_server_message(frame: &[u8]) -> Result<ServerPacket, bincode::Error> {
    bincode::deserialize(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_vector_length() {
        let v = Vector2::new(3.0, 4.0);
        assert_approx_eq!(v.length(), 5.0);

        let zero = Vector2::default();
        assert_approx_eq!(zero.length(), 0.0);
    }

    #[test]
    fn test_vector_dot() {
        let a = Vector2::new(1.0, 2.0);
        let b = Vector2::new(3.0, -1.0);
        assert_approx_eq!(a.dot(&b), 1.0);

        // Perpendicular vectors have a zero dot product
        let right = Vector2::new(1.0, 0.0);
        let down = Vector2::new(0.0, 1.0);
        assert_approx_eq!(right.dot(&down), 0.0);
    }

    #[test]
    fn test_vector_scale_and_add() {
        let v = Vector2::new(2.0, -3.0).scale(2.0).add(&Vector2::new(1.0, 1.0));
        assert_approx_eq!(v.x, 5.0);
        assert_approx_eq!(v.y, -5.0);
    }

    #[test]
    fn test_client_packet_roundtrip() {
        let packet = ClientPacket::Login {
            protocol: 5,
            name: "test pilot".to_string(),
            session: "none".to_string(),
            flag: "GB".to_string(),
        };

        let frame = marshal_client_message(&packet).unwrap();
        let decoded = unmarshal_client_message(&frame).unwrap();

        match decoded {
            ClientPacket::Login { protocol, name, .. } => {
                assert_eq!(protocol, 5);
                assert_eq!(name, "test pilot");
            }
            _ => panic!("Unexpected packet type"),
        }
    }

    #[test]
    fn test_server_packet_roundtrip() {
        let packet = ServerPacket::PlayerHit {
            id: 7,
            health: 0.85,
            projectile: 1024,
        };

        let frame = marshal_server_message(&packet).unwrap();
        let decoded = unmarshal_server_message(&frame).unwrap();

        match decoded {
            ServerPacket::PlayerHit { id, health, projectile } => {
                assert_eq!(id, 7);
                assert_approx_eq!(health, 0.85);
                assert_eq!(projectile, 1024);
            }
            _ => panic!("Unexpected packet type"),
        }
    }

    #[test]
    fn test_unmarshal_garbage_fails() {
        let garbage = [0xffu8; 16];
        assert!(unmarshal_client_message(&garbage).is_err());
    }
}
