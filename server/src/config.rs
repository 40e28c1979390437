//! Server configuration assembled from command-line arguments.

use crate::constants::*;
use clap::Parser;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
pub struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "3501")]
    pub port: u16,
    /// Tick rate (simulation updates per second)
    #[clap(short, long, default_value = "60")]
    pub tick_rate: u32,
    /// Maximum players allowed per IP address
    #[clap(long, default_value = "3")]
    pub max_players_per_ip: usize,
    /// Probability of a powerup spawn per eligible chunk, 0.0 to 1.0
    #[clap(long, default_value = "0.5")]
    pub powerup_spawn_chance: f64,
    /// Enable per-message compression on client connections
    #[clap(long, default_value = "false")]
    pub compression: bool,
    /// Require session tokens during login
    #[clap(long, default_value = "false")]
    pub auth: bool,
    /// Allow non-ASCII characters in player names
    #[clap(long, default_value = "false")]
    pub allow_non_ascii_usernames: bool,
    /// Name prefix reserved for bot connections
    #[clap(long, default_value = "")]
    pub bots_name_prefix: String,
}

/// Owned configuration passed by reference into both schedulers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tick_rate: u32,
    pub max_players_per_ip: usize,
    pub powerup_spawn_chance: f64,
    pub compression: bool,
    pub auth: bool,
    pub allow_non_ascii_usernames: bool,
    pub bots_name_prefix: String,

    // Transport boundary limits.
    pub max_payload_bytes: usize,
    pub max_backpressure_bytes: usize,
    pub idle_timeout_sec: u64,
}

impl ServerConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            host: args.host.clone(),
            port: args.port,
            tick_rate: args.tick_rate,
            max_players_per_ip: args.max_players_per_ip,
            powerup_spawn_chance: args.powerup_spawn_chance.clamp(0.0, 1.0),
            compression: args.compression,
            auth: args.auth,
            allow_non_ascii_usernames: args.allow_non_ascii_usernames,
            bots_name_prefix: args.bots_name_prefix.clone(),
            max_payload_bytes: CONNECTIONS_MAX_PAYLOAD_BYTES,
            max_backpressure_bytes: CONNECTIONS_MAX_BACKPRESSURE_BYTES,
            idle_timeout_sec: CONNECTIONS_IDLE_TIMEOUT_SEC,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3501,
            tick_rate: 60,
            max_players_per_ip: 3,
            powerup_spawn_chance: 0.5,
            compression: false,
            auth: false,
            allow_non_ascii_usernames: false,
            bots_name_prefix: String::new(),
            max_payload_bytes: CONNECTIONS_MAX_PAYLOAD_BYTES,
            max_backpressure_bytes: CONNECTIONS_MAX_BACKPRESSURE_BYTES,
            idle_timeout_sec: CONNECTIONS_IDLE_TIMEOUT_SEC,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_chance_clamped() {
        let mut args = Args::parse_from(["server"]);
        args.powerup_spawn_chance = 3.0;
        assert_eq!(ServerConfig::from_args(&args).powerup_spawn_chance, 1.0);

        args.powerup_spawn_chance = -1.0;
        assert_eq!(ServerConfig::from_args(&args).powerup_spawn_chance, 0.0);
    }

    #[test]
    fn test_defaults_align_with_args() {
        let args = Args::parse_from(["server"]);
        let config = ServerConfig::from_args(&args);
        let defaults = ServerConfig::default();

        assert_eq!(config.port, defaults.port);
        assert_eq!(config.tick_rate, defaults.tick_rate);
        assert_eq!(config.max_players_per_ip, defaults.max_players_per_ip);
    }
}
