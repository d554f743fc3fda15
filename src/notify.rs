use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{BookingRef, TransitionEvent};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for transition events: one global feed plus one channel per
/// reservation. Sending never waits on receivers.
pub struct NotifyHub {
    all: broadcast::Sender<TransitionEvent>,
    channels: DashMap<BookingRef, broadcast::Sender<TransitionEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            channels: DashMap::new(),
        }
    }

    /// Every transition on every reservation.
    pub fn subscribe_all(&self) -> broadcast::Receiver<TransitionEvent> {
        self.all.subscribe()
    }

    /// Subscribe to one reservation. Creates the channel if needed.
    pub fn subscribe(&self, id: &BookingRef) -> broadcast::Receiver<TransitionEvent> {
        let sender = self
            .channels
            .entry(id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event. No-op if nobody is listening.
    pub fn send(&self, event: &TransitionEvent) {
        let _ = self.all.send(event.clone());
        if let Some(sender) = self.channels.get(&event.reservation_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a reservation channel once it has no receivers left.
    pub fn remove(&self, id: &BookingRef) {
        self.channels.remove_if(id, |_, tx| tx.receiver_count() == 0);
    }
}
