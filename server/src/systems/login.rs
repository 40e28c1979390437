//! Login validation: protocol check, session token, name sanitation.
//!
//! A valid login does not create the player directly. The request is queued
//! on the connect channel and the simulation driver flushes it, so players
//! always join between ticks, never in the middle of one.

use crate::connection::TimerKind;
use crate::constants::PLAYERS_NAME_MAX_LENGTH;
use crate::constants::PLAYERS_SUPPORTED_PROTOCOL;
use crate::dispatch::{Channel, Event, EventKind, EventSink, LoginMessage, System, SystemResult};
use crate::relay::ConnectionId;
use crate::world::World;
use log::debug;

#[derive(Default)]
pub struct LoginSystem;

impl LoginSystem {
    pub fn new() -> Self {
        Self
    }

    fn on_login(
        &mut self,
        world: &mut World,
        sink: &mut EventSink,
        connection: ConnectionId,
        message: &LoginMessage,
    ) -> SystemResult {
        let allow_non_ascii = world.config.allow_non_ascii_usernames;
        let auth = world.config.auth;
        let bots_prefix = world.config.bots_name_prefix.clone();

        let ip = {
            let meta = match world.connections.get_mut(connection) {
                Some(meta) => meta,
                None => return Ok(()),
            };

            if meta.pending.login || meta.player_id.is_some() {
                debug!("Duplicate login on connection {}", connection);
                return Ok(());
            }

            meta.pending.login = true;
            meta.timers.cancel(TimerKind::Login);
            meta.ip.clone()
        };

        if message.protocol != PLAYERS_SUPPORTED_PROTOCOL {
            sink.emit(Event::ErrorsIncorrectProtocol { connection });
            return Ok(());
        }

        if auth && !valid_session(&message.session) {
            sink.emit(Event::ErrorsInvalidLogin { connection });
            return Ok(());
        }

        let name = sanitize_name(&message.name, allow_non_ascii);

        if name.is_empty() {
            sink.emit(Event::ErrorsInvalidLogin { connection });
            return Ok(());
        }

        // The bot name prefix is reserved for whitelisted addresses.
        let is_bot = !bots_prefix.is_empty() && name.starts_with(&bots_prefix);
        if is_bot && !world.connections.is_whitelisted(&ip) {
            debug!("Reserved bot prefix in name {} from {}", name, ip);
            sink.emit(Event::ErrorsInvalidLogin { connection });
            return Ok(());
        }

        // Relogin under a taken name kicks the previous owner; the create
        // request is already queued behind the kick.
        if let Some(&existing) = world.players_by_name.get(&name) {
            debug!("Name {} taken, kicking player {}", name, existing);
            sink.emit(Event::PlayersKick { player: existing });
        }

        sink.to_channel(
            Channel::ConnectPlayer,
            Event::PlayersCreate {
                connection,
                name,
                flag: message.flag.clone(),
                is_bot,
            },
        );

        Ok(())
    }
}

/// A session token must be a JSON object carrying a non-empty `token`
/// string. Real token verification happens upstream; the simulation only
/// rejects the obviously malformed.
fn valid_session(session: &str) -> bool {
    match serde_json::from_str::<serde_json::Value>(session) {
        Ok(value) => value
            .get("token")
            .and_then(|token| token.as_str())
            .map(|token| !token.is_empty())
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Strips control characters, collapses whitespace runs, optionally
/// restricts to ASCII, and truncates to the maximum name length.
fn sanitize_name(raw: &str, allow_non_ascii: bool) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control())
        .filter(|c| allow_non_ascii || c.is_ascii())
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    collapsed.chars().take(PLAYERS_NAME_MAX_LENGTH).collect()
}

impl System for LoginSystem {
    fn name(&self) -> &'static str {
        "login"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        &[EventKind::RouteLogin]
    }

    fn handle(&mut self, event: &Event, world: &mut World, sink: &mut EventSink) -> SystemResult {
        if let Event::RouteLogin {
            connection,
            message,
        } = event
        {
            self.on_login(world, sink, *connection, message)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::connection::ConnectionMeta;
    use crate::dispatch::Dispatcher;
    use std::collections::HashMap;

    fn setup() -> (Dispatcher, World, EventSink) {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Box::new(LoginSystem::new()));
        (
            dispatcher,
            World::new(ServerConfig::default()),
            EventSink::new(),
        )
    }

    fn add_connection(world: &mut World, id: ConnectionId) {
        world
            .connections
            .insert(ConnectionMeta::new(id, "10.0.0.1".to_string(), HashMap::new(), 0));
    }

    fn login(connection: ConnectionId, protocol: u8, name: &str) -> Event {
        Event::RouteLogin {
            connection,
            message: LoginMessage {
                protocol,
                name: name.to_string(),
                session: "none".to_string(),
                flag: "GB".to_string(),
            },
        }
    }

    #[test]
    fn test_valid_login_queues_player_create() {
        let (mut dispatcher, mut world, mut sink) = setup();
        add_connection(&mut world, 1);
        world.connections.get_mut(1).unwrap().timers.set(TimerKind::Login, 99999);

        dispatcher.dispatch(
            login(1, PLAYERS_SUPPORTED_PROTOCOL, "pilot"),
            &mut world,
            &mut sink,
        );

        let meta = world.connections.get(1).unwrap();
        assert!(meta.pending.login);
        assert!(!meta.timers.is_set(TimerKind::Login));
        assert_eq!(sink.channel_len(Channel::ConnectPlayer), 1);
    }

    #[test]
    fn test_wrong_protocol_rejected() {
        let (mut dispatcher, mut world, mut sink) = setup();
        add_connection(&mut world, 1);

        dispatcher.dispatch(login(1, 0, "pilot"), &mut world, &mut sink);

        assert_eq!(sink.channel_len(Channel::ConnectPlayer), 0);
    }

    #[test]
    fn test_second_login_on_same_connection_ignored() {
        let (mut dispatcher, mut world, mut sink) = setup();
        add_connection(&mut world, 1);

        dispatcher.dispatch(
            login(1, PLAYERS_SUPPORTED_PROTOCOL, "pilot"),
            &mut world,
            &mut sink,
        );
        dispatcher.dispatch(
            login(1, PLAYERS_SUPPORTED_PROTOCOL, "pilot2"),
            &mut world,
            &mut sink,
        );

        assert_eq!(sink.channel_len(Channel::ConnectPlayer), 1);
    }

    #[test]
    fn test_empty_name_after_sanitation_rejected() {
        let (mut dispatcher, mut world, mut sink) = setup();
        add_connection(&mut world, 1);

        dispatcher.dispatch(
            login(1, PLAYERS_SUPPORTED_PROTOCOL, "  \u{7}\u{0} "),
            &mut world,
            &mut sink,
        );

        assert_eq!(sink.channel_len(Channel::ConnectPlayer), 0);
    }

    #[test]
    fn test_session_token_required_when_auth_enabled() {
        let (mut dispatcher, mut world, mut sink) = setup();
        world.config.auth = true;
        add_connection(&mut world, 1);
        add_connection(&mut world, 2);

        dispatcher.dispatch(
            login(1, PLAYERS_SUPPORTED_PROTOCOL, "pilot"),
            &mut world,
            &mut sink,
        );
        assert_eq!(sink.channel_len(Channel::ConnectPlayer), 0);

        dispatcher.dispatch(
            Event::RouteLogin {
                connection: 2,
                message: LoginMessage {
                    protocol: PLAYERS_SUPPORTED_PROTOCOL,
                    name: "pilot".to_string(),
                    session: r#"{"token":"abc"}"#.to_string(),
                    flag: "GB".to_string(),
                },
            },
            &mut world,
            &mut sink,
        );
        assert_eq!(sink.channel_len(Channel::ConnectPlayer), 1);
    }

    #[test]
    fn test_sanitize_name_rules() {
        assert_eq!(sanitize_name("  pilot  ", false), "pilot");
        assert_eq!(sanitize_name("пилот", false), "");
        assert_eq!(sanitize_name("пилот", true), "пилот");
        assert_eq!(
            sanitize_name("a-very-long-name-that-keeps-going", false).len(),
            PLAYERS_NAME_MAX_LENGTH
        );
        assert_eq!(sanitize_name("tab\there", false), "tabhere");
        assert_eq!(sanitize_name("two   words", false), "two words");
    }

    #[test]
    fn test_bot_prefix_requires_whitelisted_ip() {
        let (mut dispatcher, mut world, mut sink) = setup();
        world.config.bots_name_prefix = "bot-".to_string();
        add_connection(&mut world, 1);
        add_connection(&mut world, 2);

        dispatcher.dispatch(
            login(1, PLAYERS_SUPPORTED_PROTOCOL, "bot-sentry"),
            &mut world,
            &mut sink,
        );
        assert_eq!(sink.channel_len(Channel::ConnectPlayer), 0);

        world.connections.whitelist_ip("10.0.0.1");
        dispatcher.dispatch(
            login(2, PLAYERS_SUPPORTED_PROTOCOL, "bot-sentry"),
            &mut world,
            &mut sink,
        );
        assert_eq!(sink.channel_len(Channel::ConnectPlayer), 1);
    }

    #[test]
    fn test_valid_session_shapes() {
        assert!(valid_session(r#"{"token":"abc"}"#));
        assert!(!valid_session(r#"{"token":""}"#));
        assert!(!valid_session(r#"{"user":"abc"}"#));
        assert!(!valid_session("none"));
        assert!(!valid_session(""));
    }
}
