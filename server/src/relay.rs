//! Cross-scheduler relay between the transport and simulation schedulers.
//!
//! The two schedulers never share mutable memory. Every interaction crosses
//! an ordered, lossless in-process channel carrying one of the tagged
//! envelopes below: [`TransportEvent`] flows from the socket side to the
//! simulation, [`SimCommand`] flows back. Envelopes are re-emitted as local
//! events on receipt; a failing handler is logged and never stops the relay.

use std::collections::HashMap;
use tokio::sync::mpsc;

pub type ConnectionId = u32;
pub type PlayerId = u32;
pub type MobId = u32;
pub type TeamId = u32;

/// Connection metadata captured at the socket boundary when a raw
/// connection finishes its handshake.
#[derive(Debug, Clone)]
pub struct OpenedConnection {
    pub id: ConnectionId,
    /// Remote address, preferring `x-forwarded-for` / `x-real-ip` headers
    /// over the socket peer address.
    pub ip: String,
    pub headers: HashMap<String, String>,
    pub created_at: u64,
}

/// Envelopes sent from the transport scheduler to the simulation scheduler.
#[derive(Debug)]
pub enum TransportEvent {
    /// The listener socket is bound and accepting.
    Started,
    ConnectionOpened { meta: OpenedConnection },
    /// An opaque binary frame, forwarded verbatim.
    PacketReceived {
        connection: ConnectionId,
        frame: Vec<u8>,
    },
    ConnectionClosed { connection: ConnectionId },
    /// Read-only admin query: full players list.
    GetPlayersList,
    /// Read-only admin query: single player by id.
    GetPlayer { player: PlayerId },
}

/// Send target of an outbound frame.
#[derive(Debug, Clone)]
pub enum Recipients {
    One(ConnectionId),
    Many(Vec<ConnectionId>),
}

/// Envelopes sent from the simulation scheduler to the transport scheduler.
#[derive(Debug)]
pub enum SimCommand {
    /// Fan a single encoded frame out to the recipients, skipping any id in
    /// the exception list. Exceptions must be a subset of the recipients.
    SendPackets {
        frame: Vec<u8>,
        recipients: Recipients,
        exceptions: Option<Vec<ConnectionId>>,
    },
    CloseConnection { connection: ConnectionId },
    PlayersListResponse { list: Vec<PlayersListItem> },
    PlayerResponse { player: Option<ActionPlayer> },
    /// Orderly shutdown of the transport scheduler, exit code 0.
    Stop,
}

/// One row of the admin players-list query response.
#[derive(Debug, Clone)]
pub struct PlayersListItem {
    pub id: PlayerId,
    pub name: String,
    pub captures: u32,
    pub kills: u32,
    pub deaths: u32,
    pub score: u64,
    pub last_move: u64,
    pub ping: u32,
    pub flag: String,
    pub is_spectate: bool,
    pub is_muted: bool,
    pub is_bot: bool,
}

/// Admin single-player query response.
#[derive(Debug, Clone)]
pub struct ActionPlayer {
    pub id: PlayerId,
    pub name: String,
    pub ip: String,
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;
pub type SimCommandSender = mpsc::UnboundedSender<SimCommand>;
pub type SimCommandReceiver = mpsc::UnboundedReceiver<SimCommand>;

/// Creates the pair of ordered channels bridging the two schedulers.
pub fn channel() -> (
    (TransportEventSender, TransportEventReceiver),
    (SimCommandSender, SimCommandReceiver),
) {
    (mpsc::unbounded_channel(), mpsc::unbounded_channel())
}
