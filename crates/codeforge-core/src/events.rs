// Event bus
//
// Broadcasts typed events to every client channel attached to the
// session. Events are serialized once and delivered per channel over an
// unbounded mpsc sender, which keeps per-channel FIFO ordering. A channel
// whose receiver is gone is dropped on the next send without affecting
// the others; subscribers never hold session state.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use codeforge_contracts::SessionEvent;

/// Identifier of one attached client channel
pub type ChannelId = Uuid;

pub struct EventBus {
    channels: RwLock<HashMap<ChannelId, mpsc::UnboundedSender<String>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a new client channel; the receiver yields serialized frames.
    pub async fn attach(&self) -> (ChannelId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::now_v7();
        self.channels.write().await.insert(id, tx);
        debug!(channel_id = %id, "Client channel attached");
        (id, rx)
    }

    /// Detach a channel. Safe to call for an already-removed id.
    pub async fn detach(&self, id: ChannelId) {
        self.channels.write().await.remove(&id);
        debug!(channel_id = %id, "Client channel detached");
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Send a typed event to every attached channel
    pub async fn broadcast(&self, event: SessionEvent) {
        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event = event.kind(), error = %e, "Failed to serialize event; dropped");
                return;
            }
        };

        let mut dead = Vec::new();
        {
            let channels = self.channels.read().await;
            for (id, sender) in channels.iter() {
                if sender.send(frame.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        if !dead.is_empty() {
            let mut channels = self.channels.write().await;
            for id in dead {
                channels.remove(&id);
            }
        }
    }

    /// Send an event to a single channel (frame replies)
    pub async fn send_to(&self, id: ChannelId, event: SessionEvent) {
        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event = event.kind(), error = %e, "Failed to serialize event; dropped");
                return;
            }
        };
        let gone = {
            let channels = self.channels.read().await;
            match channels.get(&id) {
                Some(sender) => sender.send(frame).is_err(),
                None => false,
            }
        };
        if gone {
            self.channels.write().await.remove(&id);
        }
    }

    /// Per-channel error frame
    pub async fn send_error(&self, id: ChannelId, message: impl Into<String>) {
        self.send_to(id, SessionEvent::error(message)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_all_channels() {
        let bus = EventBus::new();
        let (_a, mut rx_a) = bus.attach().await;
        let (_b, mut rx_b) = bus.attach().await;

        bus.broadcast(SessionEvent::GenerationStarted).await;

        let frame_a: serde_json::Value =
            serde_json::from_str(&rx_a.recv().await.unwrap()).unwrap();
        let frame_b: serde_json::Value =
            serde_json::from_str(&rx_b.recv().await.unwrap()).unwrap();
        assert_eq!(frame_a["type"], "generation_started");
        assert_eq!(frame_b["type"], "generation_started");
    }

    #[tokio::test]
    async fn test_channel_order_is_fifo() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.attach().await;

        bus.broadcast(SessionEvent::GenerationStarted).await;
        bus.broadcast(SessionEvent::GenerationCompleted).await;

        let first: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        let second: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["type"], "generation_started");
        assert_eq!(second["type"], "generation_completed");
    }

    #[tokio::test]
    async fn test_dead_channel_does_not_block_others() {
        let bus = EventBus::new();
        let (_dead, rx_dead) = bus.attach().await;
        let (_live, mut rx_live) = bus.attach().await;
        drop(rx_dead);

        bus.broadcast(SessionEvent::GenerationStarted).await;

        assert!(rx_live.recv().await.is_some());
        assert_eq!(bus.channel_count().await, 1);
    }

    #[tokio::test]
    async fn test_error_is_per_channel() {
        let bus = EventBus::new();
        let (target, mut rx_target) = bus.attach().await;
        let (_other, mut rx_other) = bus.attach().await;

        bus.send_error(target, "bad frame").await;

        let frame: serde_json::Value =
            serde_json::from_str(&rx_target.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "error");
        assert!(rx_other.try_recv().is_err());
    }
}
