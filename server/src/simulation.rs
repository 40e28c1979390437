//! Simulation scheduler: the fixed-rate loop driving all systems.
//!
//! Owns the world and the dispatcher; the only contact with the socket side
//! is through the relay channels. Every tick drains the inbound envelopes,
//! fires expired timers, runs the periodic drivers and flushes outbound
//! commands.

use crate::config::ServerConfig;
use crate::connection::TimerKind;
use crate::dispatch::{Channel, Dispatcher, Event, EventSink};
use crate::relay::{SimCommand, SimCommandSender, TransportEvent, TransportEventReceiver};
use crate::support::now_ms;
use crate::systems::admin::AdminSystem;
use crate::systems::chat::ChatSystem;
use crate::systems::connections::ConnectionsSystem;
use crate::systems::hit::HitSystem;
use crate::systems::login::LoginSystem;
use crate::systems::players::PlayersSystem;
use crate::systems::powerups::PowerupsSystem;
use crate::world::World;
use log::{debug, info};
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::MissedTickBehavior;

pub struct Simulation {
    world: World,
    dispatcher: Dispatcher,
    sink: EventSink,
    tick: u64,
}

impl Simulation {
    /// Builds the world and registers every system. The registration order
    /// here fixes the handler order for all events.
    pub fn new(config: ServerConfig) -> Self {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Box::new(ConnectionsSystem::new()));
        dispatcher.register(Box::new(LoginSystem::new()));
        dispatcher.register(Box::new(PlayersSystem::new()));
        dispatcher.register(Box::new(HitSystem::new()));
        dispatcher.register(Box::new(PowerupsSystem::new()));
        dispatcher.register(Box::new(ChatSystem::new()));
        dispatcher.register(Box::new(AdminSystem::new()));

        Self {
            world: World::new(config),
            dispatcher,
            sink: EventSink::new(),
            tick: 0,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Re-emits one relay envelope as a local event.
    pub fn handle_envelope(&mut self, envelope: TransportEvent) {
        let event = match envelope {
            TransportEvent::Started => {
                info!("Transport scheduler is up");
                return;
            }
            TransportEvent::ConnectionOpened { meta } => Event::ConnectionOpened { meta },
            TransportEvent::PacketReceived { connection, frame } => {
                Event::PacketReceived { connection, frame }
            }
            TransportEvent::ConnectionClosed { connection } => {
                Event::ConnectionClosed { connection }
            }
            TransportEvent::GetPlayersList => Event::AdminPlayersList,
            TransportEvent::GetPlayer { player } => Event::AdminGetPlayer { player },
        };

        self.dispatcher.dispatch(event, &mut self.world, &mut self.sink);
    }

    /// Runs one simulation step at the given clock reading.
    pub fn advance(&mut self, clock_ms: u64) {
        self.world.now_ms = clock_ms;
        self.tick += 1;

        for (connection, kind) in self.world.connections.take_expired_timers(clock_ms) {
            let event = match kind {
                TimerKind::Login => Event::TimeoutLogin { connection },
                TimerKind::Ack => Event::TimeoutAck { connection },
                TimerKind::Backup => Event::TimeoutBackup { connection },
                TimerKind::Ping => Event::TimeoutPing { connection },
                TimerKind::Respawn => Event::TimeoutRespawn { connection },
                TimerKind::Lagging => Event::TimeoutLagging { connection },
            };
            self.dispatcher.dispatch(event, &mut self.world, &mut self.sink);
        }

        let tick_rate = self.world.config.tick_rate.max(1) as u64;
        if self.tick % tick_rate == 0 {
            self.dispatcher
                .dispatch(Event::TimelineClockSecond, &mut self.world, &mut self.sink);
        }

        self.dispatcher
            .dispatch(Event::ChatEmitDelayed, &mut self.world, &mut self.sink);

        // Queued join requests enter the world between ticks, all at once.
        self.sink.emit_delayed(Channel::ConnectPlayer);
        self.dispatcher.drain_immediate(&mut self.world, &mut self.sink);

        self.dispatcher.flush_deferred(&mut self.world, &mut self.sink);
    }

    /// Takes the outbound commands accumulated since the last call.
    pub fn drain_commands(&mut self) -> Vec<SimCommand> {
        self.sink.take_commands()
    }

    /// Runs the simulation loop until the relay drops. Either direction
    /// failing tears the whole process down.
    pub async fn run(
        mut self,
        mut events: TransportEventReceiver,
        commands: SimCommandSender,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let tick_rate = self.world.config.tick_rate.max(1) as u64;
        let mut interval = tokio::time::interval(Duration::from_micros(1_000_000 / tick_rate));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Simulation scheduler running at {} ticks/sec", tick_rate);

        loop {
            interval.tick().await;

            loop {
                match events.try_recv() {
                    Ok(envelope) => self.handle_envelope(envelope),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        return Err("Transport event channel closed".into());
                    }
                }
            }

            self.advance(now_ms());

            for command in self.drain_commands() {
                if commands.send(command).is_err() {
                    return Err("Transport command channel closed".into());
                }
            }

            if self.tick % (tick_rate * 60) == 0 {
                debug!(
                    "Tick {}: {} connections, {} players, {} mobs",
                    self.tick,
                    self.world.connections.len(),
                    self.world.players.len(),
                    self.world.mobs.len()
                );
            }
        }
    }
}
