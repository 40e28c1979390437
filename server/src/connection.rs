//! Simulation-side connection state and indices.
//!
//! The transport scheduler owns the raw sockets; this registry is the
//! simulation's mirror of every open connection: status, timestamps,
//! rate-limit counters, pending-action flags and cancelable timers. All
//! access happens on the simulation task, so no locking is needed.

use crate::constants::*;
use crate::relay::{ConnectionId, PlayerId, TeamId};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Opened,
    Established,
    Closed,
}

/// Cancelable per-connection timers, stored as absolute deadlines on the
/// simulation clock. Cancelling on the corresponding success path is
/// mandatory; a stale timer would fire against a torn-down connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Login,
    Ack,
    Backup,
    Ping,
    Respawn,
    Lagging,
}

pub const TIMER_KINDS: [TimerKind; 6] = [
    TimerKind::Login,
    TimerKind::Ack,
    TimerKind::Backup,
    TimerKind::Ping,
    TimerKind::Respawn,
    TimerKind::Lagging,
];

#[derive(Debug, Default)]
pub struct Timers {
    deadlines: HashMap<TimerKind, u64>,
}

impl Timers {
    pub fn set(&mut self, kind: TimerKind, deadline_ms: u64) {
        self.deadlines.insert(kind, deadline_ms);
    }

    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.deadlines.remove(&kind).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_set(&self, kind: TimerKind) -> bool {
        self.deadlines.contains_key(&kind)
    }

    /// Removes and returns every timer whose deadline has passed.
    pub fn take_expired(&mut self, now_ms: u64) -> Vec<TimerKind> {
        let expired: Vec<TimerKind> = TIMER_KINDS
            .iter()
            .copied()
            .filter(|kind| matches!(self.deadlines.get(kind), Some(&at) if at <= now_ms))
            .collect();

        for kind in &expired {
            self.deadlines.remove(kind);
        }

        expired
    }
}

/// Per-category rate-limit counters, incremented on input and decayed once
/// per second.
#[derive(Debug, Default, Clone)]
pub struct RateLimits {
    pub any: u32,
    pub chat: u32,
    pub key: u32,
    pub respawn: u32,
    pub spectate: u32,
    pub su: u32,
    pub debug: u32,
    pub spam: u32,
}

impl RateLimits {
    /// True once the generic packet counter crosses the flooding threshold.
    pub fn is_flooding(&self) -> bool {
        self.any > LIMITS_ANY
    }

    pub fn decay(&mut self) {
        self.any = self.any.saturating_sub(LIMITS_ANY_DECREASE);
        self.chat = self.chat.saturating_sub(LIMITS_CHAT_DECREASE);
        self.key = self.key.saturating_sub(LIMITS_KEY_DECREASE);
        self.respawn = self.respawn.saturating_sub(LIMITS_RESPAWN_DECREASE);
        self.spectate = self.spectate.saturating_sub(LIMITS_SPECTATE_DECREASE);
        self.su = self.su.saturating_sub(LIMITS_SU_DECREASE);
        self.debug = self.debug.saturating_sub(LIMITS_DEBUG_DECREASE);
        self.spam = self.spam.saturating_sub(LIMITS_SPAM_DECREASE);
    }
}

#[derive(Debug, Default, Clone)]
pub struct PendingFlags {
    pub login: bool,
    pub respawn: bool,
    pub spectate: bool,
}

#[derive(Debug)]
pub struct ConnectionMeta {
    pub id: ConnectionId,
    pub ip: String,
    pub status: ConnectionStatus,
    pub headers: HashMap<String, String>,
    pub is_bot: bool,
    pub is_main: bool,
    pub is_backup: bool,
    pub player_id: Option<PlayerId>,
    pub team_id: Option<TeamId>,
    pub created_at: u64,
    pub last_packet_at: u64,
    pub lagging: bool,
    pub pending: PendingFlags,
    pub timers: Timers,
    pub limits: RateLimits,
}

impl ConnectionMeta {
    pub fn new(id: ConnectionId, ip: String, headers: HashMap<String, String>, created_at: u64) -> Self {
        Self {
            id,
            ip,
            status: ConnectionStatus::Opened,
            headers,
            is_bot: false,
            is_main: false,
            is_backup: false,
            player_id: None,
            team_id: None,
            created_at,
            last_packet_at: created_at,
            lagging: false,
            pending: PendingFlags::default(),
            timers: Timers::default(),
            limits: RateLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanReason {
    Generic,
    PacketFlooding,
}

#[derive(Debug, Clone)]
pub struct IpBan {
    pub expire: u64,
    pub reason: BanReason,
}

/// Registry of all simulation-side connection mirrors plus the auxiliary
/// indices keyed by IP.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionMeta>,
    by_ip_counter: HashMap<String, usize>,
    ip_bans: HashMap<String, IpBan>,
    ip_whitelist: HashSet<String>,
}

impl ConnectionRegistry {
    pub fn insert(&mut self, meta: ConnectionMeta) {
        self.connections.insert(meta.id, meta);
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionMeta> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionMeta> {
        self.connections.get_mut(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionMeta> {
        self.connections.values()
    }

    /// Removes the connection mirror. Timers are cancelled and the per-IP
    /// counter is decremented before the entry is dropped.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionMeta> {
        let mut meta = self.connections.remove(&id)?;

        meta.timers.cancel_all();
        meta.status = ConnectionStatus::Closed;

        if let Some(counter) = self.by_ip_counter.get_mut(&meta.ip) {
            *counter = counter.saturating_sub(1);

            if *counter == 0 {
                self.by_ip_counter.remove(&meta.ip);
            }
        }

        Some(meta)
    }

    /// Counts one more connection from the IP and returns the new total.
    pub fn track_ip(&mut self, ip: &str) -> usize {
        let counter = self.by_ip_counter.entry(ip.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn connections_from_ip(&self, ip: &str) -> usize {
        self.by_ip_counter.get(ip).copied().unwrap_or(0)
    }

    /// Collects every expired timer across all connections, oldest
    /// connections first for a stable firing order.
    pub fn take_expired_timers(&mut self, now_ms: u64) -> Vec<(ConnectionId, TimerKind)> {
        let mut ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        ids.sort_unstable();

        let mut fired = Vec::new();

        for id in ids {
            if let Some(meta) = self.connections.get_mut(&id) {
                for kind in meta.timers.take_expired(now_ms) {
                    fired.push((id, kind));
                }
            }
        }

        fired
    }

    pub fn ban_ip(&mut self, ip: &str, expire: u64, reason: BanReason) {
        self.ip_bans.insert(ip.to_string(), IpBan { expire, reason });
    }

    pub fn unban_ip(&mut self, ip: &str) -> bool {
        self.ip_bans.remove(ip).is_some()
    }

    /// Returns the active ban for the IP, dropping it lazily if expired.
    pub fn active_ban(&mut self, ip: &str, now_ms: u64) -> Option<IpBan> {
        match self.ip_bans.get(ip) {
            Some(ban) if ban.expire > now_ms => Some(ban.clone()),
            Some(_) => {
                self.ip_bans.remove(ip);
                None
            }
            None => None,
        }
    }

    pub fn whitelist_ip(&mut self, ip: &str) {
        self.ip_whitelist.insert(ip.to_string());
    }

    pub fn is_whitelisted(&self, ip: &str) -> bool {
        self.ip_whitelist.contains(ip)
    }
}
