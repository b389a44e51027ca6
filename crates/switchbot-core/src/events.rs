//! Device event stream.
//!
//! A [`Device`](crate::device::Device) publishes connection and state events
//! on a broadcast channel. Events are serializable so they can be logged or
//! forwarded as JSON.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use switchbot_types::DeviceIdentity;

use crate::state::StateMap;

/// Events emitted by a device client.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DeviceEvent {
    /// A connection was established and notifications are running.
    Connected { device: DeviceIdentity },
    /// The connection closed.
    Disconnected {
        device: DeviceIdentity,
        reason: DisconnectReason,
    },
    /// Decoded state changed; `data` is the merged state.
    StateChanged {
        device: DeviceIdentity,
        data: StateMap,
    },
    /// An unsolicited notification was received (hex payload).
    PushReceived {
        device: DeviceIdentity,
        payload: String,
    },
    /// A command gave up.
    CommandFailed {
        device: DeviceIdentity,
        error: String,
    },
}

/// Why a connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DisconnectReason {
    /// The idle timer expired.
    Idle,
    /// The client tore the link down (explicit call or failed attempt).
    Requested,
    /// The peer or the stack dropped the link.
    Unexpected,
}

/// Sender for device events.
pub type EventSender = broadcast::Sender<DeviceEvent>;

/// Receiver for device events.
pub type EventReceiver = broadcast::Receiver<DeviceEvent>;

/// Fan-out of device events to any number of receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: DeviceEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_to_receiver() {
        let dispatcher = EventDispatcher::default();
        let mut rx = dispatcher.subscribe();
        let device = DeviceIdentity::new("AA:BB:CC:DD:EE:FF");

        dispatcher.send(DeviceEvent::Connected {
            device: device.clone(),
        });
        assert_eq!(rx.recv().await.unwrap(), DeviceEvent::Connected { device });
    }

    #[test]
    fn test_send_without_receivers() {
        let dispatcher = EventDispatcher::new(4);
        assert_eq!(dispatcher.receiver_count(), 0);
        dispatcher.send(DeviceEvent::Disconnected {
            device: DeviceIdentity::new("AA:BB:CC:DD:EE:FF"),
            reason: DisconnectReason::Idle,
        });
    }

    #[test]
    fn test_event_serialization() {
        let event = DeviceEvent::Disconnected {
            device: DeviceIdentity::new("AA:BB:CC:DD:EE:FF"),
            reason: DisconnectReason::Unexpected,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "disconnected");
        assert_eq!(json["reason"], "unexpected");
    }
}
