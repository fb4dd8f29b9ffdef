use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::models::Notification;

/// Per-user pub/sub rooms for live notifications.
///
/// Each connected user gets one broadcast channel; every open stream of that
/// user holds a receiver. Delivery is best-effort: nothing is buffered for
/// users without a live stream, and a receiver that falls more than
/// `capacity` messages behind skips ahead.
pub struct NotificationHub {
    rooms: DashMap<String, broadcast::Sender<Notification>>,
    capacity: usize,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(64)
    }
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Joins the room of `user_id`, creating it on first use.
    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<Notification> {
        self.rooms
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Sends to every live stream of `user_id`. Returns how many received it.
    pub fn publish(&self, user_id: &str, notification: Notification) -> usize {
        let delivered = match self.rooms.get(user_id) {
            Some(tx) => tx.send(notification).unwrap_or(0),
            None => 0,
        };

        if delivered == 0 {
            // Everyone left; drop the room
            if self
                .rooms
                .remove_if(user_id, |_, tx| tx.receiver_count() == 0)
                .is_some()
            {
                debug!("Closed empty notification room for {user_id}");
            }
        }
        delivered
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Removes rooms nobody listens to anymore.
    pub fn prune(&self) -> usize {
        let before = self.rooms.len();
        self.rooms.retain(|_, tx| tx.receiver_count() > 0);
        before - self.rooms.len()
    }
}
