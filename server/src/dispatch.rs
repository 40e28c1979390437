//! Event dispatch for the simulation scheduler.
//!
//! Systems register once at startup in a fixed order and declare the event
//! kinds they handle; registration order is the tie-break between handlers
//! of the same event. Three delivery modes exist, all single-threaded and
//! cooperative:
//!
//! - **immediate emit**: handlers run in registration order before the
//!   current dispatch wave completes;
//! - **tick-deferred delay**: queued FIFO, runs later in the same step,
//!   after all immediate effects; used to avoid mutating a collection that
//!   is being iterated;
//! - **channel-batched delayed emit**: events accumulate on a named channel
//!   in arrival order and are drained by a periodic driver, either a whole
//!   batch or exactly one oldest item per flush.
//!
//! A failing handler is logged and isolated; it never aborts the tick.

use crate::relay::{ConnectionId, MobId, OpenedConnection, PlayerId, SimCommand};
use crate::world::{PowerupKind, World};
use log::error;
use std::collections::{HashMap, VecDeque};

/// Login packet fields carried from the packet router to the login system.
#[derive(Debug, Clone)]
pub struct LoginMessage {
    pub protocol: u8,
    pub name: String,
    pub session: String,
    pub flag: String,
}

/// Closed set of simulation events.
#[derive(Debug, Clone)]
pub enum Event {
    // Transport lifecycle, re-emitted from relay envelopes.
    ConnectionOpened { meta: OpenedConnection },
    ConnectionClosed { connection: ConnectionId },
    PacketReceived { connection: ConnectionId, frame: Vec<u8> },

    // Connection timers.
    TimeoutLogin { connection: ConnectionId },
    TimeoutAck { connection: ConnectionId },
    TimeoutBackup { connection: ConnectionId },
    TimeoutPing { connection: ConnectionId },
    TimeoutRespawn { connection: ConnectionId },
    TimeoutLagging { connection: ConnectionId },

    // Packet routes.
    RouteLogin { connection: ConnectionId, message: LoginMessage },
    RouteCommand { connection: ConnectionId, com: String, data: String },

    // Player lifecycle.
    PlayersCreate {
        connection: ConnectionId,
        name: String,
        flag: String,
        is_bot: bool,
    },
    PlayersCreated { player: PlayerId },
    PlayersRemove { player: PlayerId },
    PlayersRemoved { player: PlayerId },
    PlayersKick { player: PlayerId },

    // Combat.
    PlayersHit {
        victim: PlayerId,
        projectile: Option<MobId>,
        flat_damage: f64,
    },
    PlayersDeath {
        victim: PlayerId,
        killer: Option<PlayerId>,
    },

    // Chat.
    ChatPublic { player: PlayerId, text: String },
    ChatTeam { player: PlayerId, text: String },
    ChatSay { player: PlayerId, text: String },
    ChatWhisper { player: PlayerId, to: PlayerId, text: String },
    /// Per-tick driver for the rate-limited chat channel.
    ChatEmitDelayed,

    // Powerups.
    PowerupsSpawn {
        kind: PowerupKind,
        x: f64,
        y: f64,
        owner: Option<PlayerId>,
        permanent: bool,
    },
    PowerupsDespawn { mob: MobId },
    PowerupsDespawned { mob: MobId },
    PowerupsPicked { mob: MobId, player: Option<PlayerId> },
    PowerupsSpawnByCoords { x: f64, y: f64 },

    // Timeline.
    TimelineClockSecond,

    // Errors and abuse handling.
    ResponsePlayerBan { connection: ConnectionId, flood: bool },
    ErrorsIncorrectProtocol { connection: ConnectionId },
    ErrorsInvalidLogin { connection: ConnectionId },
    ConnectionsBanIp { ip: String, duration_ms: u64, flood: bool },
    ConnectionsUnbanIp { ip: String },
    ConnectionsKick { connection: ConnectionId },

    // Admin queries.
    AdminPlayersList,
    AdminGetPlayer { player: PlayerId },
}

/// Subscription keys, one per [`Event`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionOpened,
    ConnectionClosed,
    PacketReceived,
    TimeoutLogin,
    TimeoutAck,
    TimeoutBackup,
    TimeoutPing,
    TimeoutRespawn,
    TimeoutLagging,
    RouteLogin,
    RouteCommand,
    PlayersCreate,
    PlayersCreated,
    PlayersRemove,
    PlayersRemoved,
    PlayersKick,
    PlayersHit,
    PlayersDeath,
    ChatPublic,
    ChatTeam,
    ChatSay,
    ChatWhisper,
    ChatEmitDelayed,
    PowerupsSpawn,
    PowerupsDespawn,
    PowerupsDespawned,
    PowerupsPicked,
    PowerupsSpawnByCoords,
    TimelineClockSecond,
    ResponsePlayerBan,
    ErrorsIncorrectProtocol,
    ErrorsInvalidLogin,
    ConnectionsBanIp,
    ConnectionsUnbanIp,
    ConnectionsKick,
    AdminPlayersList,
    AdminGetPlayer,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ConnectionOpened { .. } => EventKind::ConnectionOpened,
            Event::ConnectionClosed { .. } => EventKind::ConnectionClosed,
            Event::PacketReceived { .. } => EventKind::PacketReceived,
            Event::TimeoutLogin { .. } => EventKind::TimeoutLogin,
            Event::TimeoutAck { .. } => EventKind::TimeoutAck,
            Event::TimeoutBackup { .. } => EventKind::TimeoutBackup,
            Event::TimeoutPing { .. } => EventKind::TimeoutPing,
            Event::TimeoutRespawn { .. } => EventKind::TimeoutRespawn,
            Event::TimeoutLagging { .. } => EventKind::TimeoutLagging,
            Event::RouteLogin { .. } => EventKind::RouteLogin,
            Event::RouteCommand { .. } => EventKind::RouteCommand,
            Event::PlayersCreate { .. } => EventKind::PlayersCreate,
            Event::PlayersCreated { .. } => EventKind::PlayersCreated,
            Event::PlayersRemove { .. } => EventKind::PlayersRemove,
            Event::PlayersRemoved { .. } => EventKind::PlayersRemoved,
            Event::PlayersKick { .. } => EventKind::PlayersKick,
            Event::PlayersHit { .. } => EventKind::PlayersHit,
            Event::PlayersDeath { .. } => EventKind::PlayersDeath,
            Event::ChatPublic { .. } => EventKind::ChatPublic,
            Event::ChatTeam { .. } => EventKind::ChatTeam,
            Event::ChatSay { .. } => EventKind::ChatSay,
            Event::ChatWhisper { .. } => EventKind::ChatWhisper,
            Event::ChatEmitDelayed => EventKind::ChatEmitDelayed,
            Event::PowerupsSpawn { .. } => EventKind::PowerupsSpawn,
            Event::PowerupsDespawn { .. } => EventKind::PowerupsDespawn,
            Event::PowerupsDespawned { .. } => EventKind::PowerupsDespawned,
            Event::PowerupsPicked { .. } => EventKind::PowerupsPicked,
            Event::PowerupsSpawnByCoords { .. } => EventKind::PowerupsSpawnByCoords,
            Event::TimelineClockSecond => EventKind::TimelineClockSecond,
            Event::ResponsePlayerBan { .. } => EventKind::ResponsePlayerBan,
            Event::ErrorsIncorrectProtocol { .. } => EventKind::ErrorsIncorrectProtocol,
            Event::ErrorsInvalidLogin { .. } => EventKind::ErrorsInvalidLogin,
            Event::ConnectionsBanIp { .. } => EventKind::ConnectionsBanIp,
            Event::ConnectionsUnbanIp { .. } => EventKind::ConnectionsUnbanIp,
            Event::ConnectionsKick { .. } => EventKind::ConnectionsKick,
            Event::AdminPlayersList => EventKind::AdminPlayersList,
            Event::AdminGetPlayer { .. } => EventKind::AdminGetPlayer,
        }
    }
}

/// Named FIFO channels for batched delayed emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Chat,
    ConnectPlayer,
}

/// Outbox shared by all handlers during a tick: pending events in each
/// delivery mode plus commands bound for the transport scheduler.
#[derive(Default)]
pub struct EventSink {
    immediate: VecDeque<Event>,
    deferred: VecDeque<Event>,
    channels: HashMap<Channel, VecDeque<Event>>,
    commands: Vec<SimCommand>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an event for the current dispatch wave.
    pub fn emit(&mut self, event: Event) {
        self.immediate.push_back(event);
    }

    /// Queues an event to run later in the same simulation step, after the
    /// current pass over entities completes.
    pub fn delay(&mut self, event: Event) {
        self.deferred.push_back(event);
    }

    /// Pushes an event onto a named channel; it stays there until a driver
    /// flushes the channel.
    pub fn to_channel(&mut self, channel: Channel, event: Event) {
        self.channels.entry(channel).or_default().push_back(event);
    }

    /// Moves the whole channel backlog into the immediate queue, FIFO.
    pub fn emit_delayed(&mut self, channel: Channel) {
        if let Some(queue) = self.channels.get_mut(&channel) {
            while let Some(event) = queue.pop_front() {
                self.immediate.push_back(event);
            }
        }
    }

    /// Moves exactly the oldest queued event into the immediate queue,
    /// rate-limiting delivery to one item per flush.
    pub fn emit_first_delayed(&mut self, channel: Channel) {
        if let Some(event) = self
            .channels
            .get_mut(&channel)
            .and_then(|queue| queue.pop_front())
        {
            self.immediate.push_back(event);
        }
    }

    pub fn channel_len(&self, channel: Channel) -> usize {
        self.channels.get(&channel).map(VecDeque::len).unwrap_or(0)
    }

    /// Queues a command for the transport scheduler, flushed at tick end.
    pub fn send(&mut self, command: SimCommand) {
        self.commands.push(command);
    }

    pub fn take_commands(&mut self) -> Vec<SimCommand> {
        std::mem::take(&mut self.commands)
    }

    fn pop_immediate(&mut self) -> Option<Event> {
        self.immediate.pop_front()
    }

    fn pop_deferred(&mut self) -> Option<Event> {
        self.deferred.pop_front()
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }
}

pub type SystemResult = Result<(), Box<dyn std::error::Error>>;

/// A unit of simulation logic: declares its subscriptions once and handles
/// dispatched events against the world store.
///
/// `Send` is required because the simulation scheduler owning the
/// dispatcher runs as a spawned task.
pub trait System: Send {
    fn name(&self) -> &'static str;

    fn subscriptions(&self) -> &'static [EventKind];

    fn handle(&mut self, event: &Event, world: &mut World, sink: &mut EventSink) -> SystemResult;
}

/// Routes events to subscribed systems in registration order.
pub struct Dispatcher {
    systems: Vec<Box<dyn System>>,
    routes: HashMap<EventKind, Vec<usize>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            systems: Vec::new(),
            routes: HashMap::new(),
        }
    }

    /// Registers a system. Registration happens once at startup; the order
    /// of calls fixes the handler order for every event kind.
    pub fn register(&mut self, system: Box<dyn System>) {
        let index = self.systems.len();

        for kind in system.subscriptions() {
            self.routes.entry(*kind).or_default().push(index);
        }

        self.systems.push(system);
    }

    /// Immediate emit: delivers the event and everything it transitively
    /// emits before returning.
    pub fn dispatch(&mut self, event: Event, world: &mut World, sink: &mut EventSink) {
        sink.emit(event);
        self.drain_immediate(world, sink);
    }

    /// Runs the tick-deferred queue: FIFO among themselves, after all
    /// immediate effects of the current step.
    pub fn flush_deferred(&mut self, world: &mut World, sink: &mut EventSink) {
        while let Some(event) = sink.pop_deferred() {
            sink.emit(event);
            self.drain_immediate(world, sink);
        }
    }

    pub(crate) fn drain_immediate(&mut self, world: &mut World, sink: &mut EventSink) {
        while let Some(event) = sink.pop_immediate() {
            let Dispatcher { systems, routes } = self;

            if let Some(route) = routes.get(&event.kind()) {
                for &index in route {
                    let system = &mut systems[index];

                    if let Err(err) = system.handle(&event, world, sink) {
                        error!(
                            "System {} failed handling {:?}: {}",
                            system.name(),
                            event.kind(),
                            err
                        );
                    }
                }
            }
        }
    }
}
