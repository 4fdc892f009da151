//! Typed event sink for the control surface
//!
//! Facade mutations and the engine loop publish [`BackendEvent`]s onto a
//! bounded channel so the transport layer (out of scope here) can forward
//! them. Publishing never blocks: a full bus drops the event instead of
//! stalling a facade call or the tick thread.

use crossbeam::channel::{Receiver, Sender};

use crate::config::{ConfigMismatch, EngineConfig};
use crate::engine::vu::VuLevels;
use crate::types::{ChannelId, TabletId};

/// Default bus capacity.
pub const EVENT_BUS_CAPACITY: usize = 1024;

/// Events emitted by the backend.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// The periodic engine loop started
    EngineStarted { fs: u32, frame_size: usize },
    /// The periodic engine loop stopped; state stays queryable
    EngineStopped,
    /// Routing matrices and/or headroom changed
    MatrixUpdated {
        uplink_changed: bool,
        downlink_changed: bool,
        headroom_changed: bool,
    },
    /// All routing entries reset to a uniform gain
    RoutingReset { gain_db: f32 },
    ChannelMuteSet { channel: ChannelId, mute: bool },
    TabletMuteSet { tablet: TabletId, mute: bool },
    PttRequested {
        tablet: TabletId,
        channel: ChannelId,
        priority: i32,
        active_tablets: Vec<TabletId>,
    },
    PttReleased {
        tablet: TabletId,
        channel: ChannelId,
        active_tablets: Vec<TabletId>,
    },
    ConfigReloaded { config: EngineConfig },
    /// Reloaded config disagrees with a compiled constant
    ConfigMismatch(ConfigMismatch),
    /// Decimated level feed
    VuLevels { ts: f64, vu_db: VuLevels },
}

/// Non-blocking publisher handle.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<BackendEvent>,
}

impl EventSender {
    /// Publish an event, dropping it if the bus is full.
    pub fn publish(&self, event: BackendEvent) {
        if self.tx.try_send(event).is_err() {
            log::trace!("event bus full, dropping event");
        }
    }
}

/// Bounded event bus connecting the backend to its consumers.
///
/// Receivers share the queue: each event is delivered to one subscriber.
pub struct EventBus {
    sender: Sender<BackendEvent>,
    receiver: Receiver<BackendEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam::channel::bounded(capacity);
        Self { sender, receiver }
    }

    /// Get a publisher handle.
    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.sender.clone(),
        }
    }

    /// Get a receiver for consuming events.
    pub fn subscribe(&self) -> Receiver<BackendEvent> {
        self.receiver.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUS_CAPACITY)
    }
}
