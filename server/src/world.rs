//! World store: every live entity plus the auxiliary indices.
//!
//! One `World` is constructed at simulation-scheduler startup and passed by
//! mutable reference to every system. All access is single-threaded and
//! cooperative, so there is no locking anywhere in here.

use crate::combat::{PlaneType, ProjectileType};
use crate::config::ServerConfig;
use crate::connection::ConnectionRegistry;
use crate::ids::IdentifierPool;
use crate::relay::{ConnectionId, MobId, PlayerId, TeamId};
use crate::spawn_grid::SpawnGrid;
use shared::Vector2;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliveStatus {
    Alive,
    Dead,
    Spectating,
}

#[derive(Debug, Default, Clone)]
pub struct PlayerStats {
    pub kills: u32,
    pub deaths: u32,
    pub captures: u32,
    pub score: u64,
    /// Damage dealt, tracked in hundredths of a health bar.
    pub damage_dealt: u64,
    pub hits_dealt: u32,
    pub hits_received: u32,
}

#[derive(Debug, Default, Clone)]
pub struct PlayerTimes {
    pub last_move: u64,
    pub last_hit: u64,
    pub unmute_time: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Upgrades {
    pub speed: usize,
    pub defense: usize,
    pub energy: usize,
    pub missile: usize,
}

#[derive(Debug)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub flag: String,
    pub team: TeamId,
    pub plane: PlaneType,
    pub alive: AliveStatus,
    pub pos: Vector2,
    pub velocity: Vector2,
    pub rotation: f64,
    /// Fraction of the current effective maximum, in `[MIN, 1]`.
    pub health: f64,
    pub shielded: bool,
    pub upgrades: Upgrades,
    pub stats: PlayerStats,
    pub times: PlayerTimes,
    pub keystate: u8,
    pub ping: u32,
    pub is_bot: bool,
    pub is_superuser: bool,
    /// Main connection this player logged in over.
    pub connection: ConnectionId,
}

impl Player {
    pub fn new(id: PlayerId, name: String, flag: String, connection: ConnectionId) -> Self {
        Self {
            id,
            name,
            flag,
            team: id,
            plane: PlaneType::Goliath,
            alive: AliveStatus::Alive,
            pos: Vector2::default(),
            velocity: Vector2::default(),
            rotation: 0.0,
            health: 1.0,
            shielded: false,
            upgrades: Upgrades::default(),
            stats: PlayerStats::default(),
            times: PlayerTimes::default(),
            keystate: 0,
            ping: 0,
            is_bot: false,
            is_superuser: false,
            connection,
        }
    }

    pub fn is_muted(&self, now_ms: u64) -> bool {
        self.times.unmute_time > now_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerupKind {
    Shield,
    Inferno,
    Upgrade,
}

impl PowerupKind {
    pub fn as_u8(&self) -> u8 {
        match self {
            PowerupKind::Shield => 101,
            PowerupKind::Inferno => 102,
            PowerupKind::Upgrade => 103,
        }
    }
}

#[derive(Debug)]
pub struct Projectile {
    pub id: MobId,
    pub projectile_type: ProjectileType,
    pub pos: Vector2,
    pub velocity: Vector2,
    pub owner: Option<PlayerId>,
    pub double_damage: bool,
}

#[derive(Debug)]
pub struct Powerup {
    pub id: MobId,
    pub kind: PowerupKind,
    pub pos: Vector2,
    /// Absolute despawn deadline; `None` means permanent.
    pub despawn_at: Option<u64>,
    pub owner: Option<PlayerId>,
}

/// Mobs are polymorphic over projectiles and powerups.
#[derive(Debug)]
pub enum Mob {
    Projectile(Projectile),
    Powerup(Powerup),
}

impl Mob {
    pub fn id(&self) -> MobId {
        match self {
            Mob::Projectile(projectile) => projectile.id,
            Mob::Powerup(powerup) => powerup.id,
        }
    }
}

#[derive(Debug)]
pub struct World {
    pub config: ServerConfig,

    /// Simulation clock in wall milliseconds, advanced once per tick.
    pub now_ms: u64,

    pub connections: ConnectionRegistry,

    pub players: HashMap<PlayerId, Player>,
    pub mobs: HashMap<MobId, Mob>,

    // Auxiliary indices.
    pub bot_ids: HashSet<PlayerId>,
    pub spectator_ids: HashSet<PlayerId>,
    pub shield_ids: HashSet<MobId>,
    pub inferno_ids: HashSet<MobId>,
    pub upgrade_ids: HashSet<MobId>,
    pub projectile_ids: HashSet<MobId>,
    pub players_by_name: HashMap<String, PlayerId>,
    pub players_by_team: HashMap<TeamId, HashSet<PlayerId>>,

    pub player_ids: IdentifierPool,
    pub mob_ids: IdentifierPool,

    pub spawn_grid: SpawnGrid,
}

impl World {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            now_ms: 0,
            connections: ConnectionRegistry::default(),
            players: HashMap::new(),
            mobs: HashMap::new(),
            bot_ids: HashSet::new(),
            spectator_ids: HashSet::new(),
            shield_ids: HashSet::new(),
            inferno_ids: HashSet::new(),
            upgrade_ids: HashSet::new(),
            projectile_ids: HashSet::new(),
            players_by_name: HashMap::new(),
            players_by_team: HashMap::new(),
            player_ids: IdentifierPool::new(),
            mob_ids: IdentifierPool::new(),
            spawn_grid: SpawnGrid::new(),
        }
    }

    pub fn is_player_connected(&self, player_id: PlayerId) -> bool {
        self.players
            .get(&player_id)
            .map(|player| self.connections.contains(player.connection))
            .unwrap_or(false)
    }

    /// Main connection id of a player, if both still exist.
    pub fn player_connection(&self, player_id: PlayerId) -> Option<ConnectionId> {
        self.players.get(&player_id).map(|player| player.connection)
    }

    /// Main connection ids of all players, the broadcast target set.
    pub fn broadcast_connections(&self) -> Vec<ConnectionId> {
        self.players.values().map(|player| player.connection).collect()
    }

    /// Main connection ids of one team.
    pub fn team_connections(&self, team: TeamId) -> Vec<ConnectionId> {
        match self.players_by_team.get(&team) {
            Some(members) => members
                .iter()
                .filter_map(|id| self.player_connection(*id))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Registers a player in every index it belongs to.
    pub fn index_player(&mut self, player_id: PlayerId) {
        if let Some(player) = self.players.get(&player_id) {
            self.players_by_name.insert(player.name.clone(), player_id);
            self.players_by_team
                .entry(player.team)
                .or_default()
                .insert(player_id);

            if player.is_bot {
                self.bot_ids.insert(player_id);
            }
        }
    }

    /// Removes a player and every index entry referencing it. The player id
    /// is released only after all teardown.
    pub fn remove_player(&mut self, player_id: PlayerId) -> Option<Player> {
        let player = self.players.remove(&player_id)?;

        self.players_by_name.remove(&player.name);

        if let Some(members) = self.players_by_team.get_mut(&player.team) {
            members.remove(&player_id);

            if members.is_empty() {
                self.players_by_team.remove(&player.team);
            }
        }

        self.bot_ids.remove(&player_id);
        self.spectator_ids.remove(&player_id);

        self.player_ids.release(player_id);

        Some(player)
    }

    pub fn insert_mob(&mut self, mob: Mob) {
        let id = mob.id();

        match &mob {
            Mob::Projectile(_) => {
                self.projectile_ids.insert(id);
            }
            Mob::Powerup(powerup) => match powerup.kind {
                PowerupKind::Shield => {
                    self.shield_ids.insert(id);
                }
                PowerupKind::Inferno => {
                    self.inferno_ids.insert(id);
                }
                PowerupKind::Upgrade => {
                    self.upgrade_ids.insert(id);
                }
            },
        }

        self.mobs.insert(id, mob);
    }

    /// Removes a mob from the mob map and its type-specific id set in one
    /// step, then releases the id. A mob never lingers in a stale index.
    pub fn remove_mob(&mut self, mob_id: MobId) -> Option<Mob> {
        let mob = self.mobs.remove(&mob_id)?;

        match &mob {
            Mob::Projectile(_) => {
                self.projectile_ids.remove(&mob_id);
            }
            Mob::Powerup(powerup) => match powerup.kind {
                PowerupKind::Shield => {
                    self.shield_ids.remove(&mob_id);
                }
                PowerupKind::Inferno => {
                    self.inferno_ids.remove(&mob_id);
                }
                PowerupKind::Upgrade => {
                    self.upgrade_ids.remove(&mob_id);
                }
            },
        }

        self.mob_ids.release(mob_id);

        Some(mob)
    }
}
