//! Tuning constants for the simulation core.
//!
//! Transport limits are enforced at the socket boundary only; everything else
//! belongs to the simulation scheduler.

pub const MS_PER_SEC: u64 = 1000;

/// World bounds, centered on the origin.
pub const MAP_WIDTH: f64 = 32768.0;
pub const MAP_HEIGHT: f64 = 16384.0;

// Transport boundary.
pub const CONNECTIONS_MAX_PAYLOAD_BYTES: usize = 4096;
pub const CONNECTIONS_MAX_BACKPRESSURE_BYTES: usize = 1 << 20;
pub const CONNECTIONS_IDLE_TIMEOUT_SEC: u64 = 60;

/// How long a fresh connection may sit without a Login packet.
pub const CONNECTIONS_LOGIN_TIMEOUT_MS: u64 = 10_000;

/// Grace period for the post-login Ack handshake.
pub const CONNECTIONS_ACK_TIMEOUT_MS: u64 = 10_000;

/// Grace period for the optional backup-connection token.
pub const CONNECTIONS_BACKUP_TIMEOUT_MS: u64 = 15_000;

/// Interval between server pings to an established connection.
pub const CONNECTIONS_PING_INTERVAL_MS: u64 = 5_000;

/// Lag detection window: a connection silent this long is marked lagging.
pub const CONNECTIONS_LAG_DETECT_MS: u64 = 2_000;

/// Each player slot allows this many raw connections (main + backup).
pub const CONNECTIONS_PLAYERS_TO_CONNECTIONS_MULTIPLIER: usize = 2;

/// Ban duration applied when packet flooding is detected.
pub const CONNECTIONS_FLOOD_BAN_MS: u64 = 600_000;

// Per-second rate-limit thresholds and decay amounts.
pub const LIMITS_ANY: u32 = 110;
pub const LIMITS_ANY_DECREASE: u32 = 50;
pub const LIMITS_CHAT: u32 = 2;
pub const LIMITS_CHAT_DECREASE: u32 = 1;
pub const LIMITS_KEY: u32 = 50;
pub const LIMITS_KEY_DECREASE: u32 = 30;
pub const LIMITS_RESPAWN: u32 = 2;
pub const LIMITS_RESPAWN_DECREASE: u32 = 1;
pub const LIMITS_SPECTATE: u32 = 2;
pub const LIMITS_SPECTATE_DECREASE: u32 = 1;
pub const LIMITS_SU: u32 = 2;
pub const LIMITS_SU_DECREASE: u32 = 1;
pub const LIMITS_DEBUG: u32 = 2;
pub const LIMITS_DEBUG_DECREASE: u32 = 1;
pub const LIMITS_SPAM: u32 = 20;
pub const LIMITS_SPAM_DECREASE: u32 = 10;

// Players.
pub const PLAYERS_NAME_MAX_LENGTH: usize = 20;
pub const PLAYERS_HEALTH_MIN: f64 = 0.0;
pub const PLAYERS_RESPAWN_DELAY_MS: u64 = 2_000;
pub const PLAYERS_SUPPORTED_PROTOCOL: u8 = 5;

// Chat: one queued broadcast is flushed only every this many ticks.
pub const CHAT_MESSAGE_PER_TICKS_LIMIT: u32 = 6;
pub const CHAT_SAY_LIFETIME_MS: u64 = 3_000;

// Powerup spawn grid. The map splits into square chunks of side 2^POW,
// giving COLS x ROWS chunks; chunk index 0 is reserved invalid.
pub const POWERUPS_GRID_POW: u32 = 12;
pub const POWERUPS_GRID_COLS: i64 = 8;
pub const POWERUPS_GRID_ROWS: i64 = 4;
pub const POWERUPS_GRID_CHUNKS: u32 = (POWERUPS_GRID_COLS * POWERUPS_GRID_ROWS) as u32;

/// A chunk must spawn within this many seconds of becoming eligible,
/// whatever the configured spawn probability.
pub const POWERUPS_SPAWN_GUARANTEED_SEC: i64 = 540;

/// Cooldown after a spawn before the chunk becomes eligible again.
pub const POWERUPS_RESPAWN_TIMEOUT_MS: u64 = 90_000;

pub const POWERUPS_DEFAULT_DESPAWN_MS: u64 = 600_000;

/// Spawn jitter around a zone center: powerup radius margin.
pub const POWERUPS_SPAWN_JITTER: i64 = 10;

/// Candidate zone centers are inset from chunk borders by this margin.
pub const POWERUPS_ZONE_INSET: f64 = 512.0;

// Combat.
pub const PROJECTILES_EXTRA_SPEED_TO_DAMAGE_FACTOR: f64 = 0.01;

/// Closing-speed clamp boundary as a share of the projectile's base
/// max speed: 0.25 max upgrade factor, applied twice (both directions).
pub const PROJECTILES_MAX_EXTRA_SPEED_FACTOR: f64 = 0.25 * 2.0;

/// Defense upgrade multipliers indexed by upgrade level.
pub const UPGRADES_DEFENSE_FACTOR: [f64; 6] = [1.0, 1.05, 1.1, 1.15, 1.2, 1.25];
