//! Status fan-out to connected subscribers
//!
//! Each subscriber holds a single slot with the latest snapshot. A slow
//! subscriber misses intermediate snapshots but always reads the newest one;
//! a subscriber whose receiving side is gone is removed on the next push.
//!
//! Snapshots are taken while the subscriber set is locked, so pushes from the
//! tick loop and from state changes reach every subscriber in the order the
//! snapshots were taken.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use uuid::Uuid;

use crate::controller::FanController;
use crate::protocol::ServerMessage;

pub type SubscriberId = Uuid;

/// Receiving half handed to a new subscriber
pub struct Subscription {
    pub id: SubscriberId,
    latest: watch::Receiver<Option<ServerMessage>>,
}

impl Subscription {
    /// Wait for a snapshot newer than the last one read.
    ///
    /// Returns `None` once the subscriber has been removed.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        loop {
            self.latest.changed().await.ok()?;
            if let Some(msg) = self.latest.borrow_and_update().clone() {
                return Some(msg);
            }
        }
    }

    /// Newest unread snapshot, if any
    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        if !self.latest.has_changed().unwrap_or(false) {
            return None;
        }
        self.latest.borrow_and_update().clone()
    }
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub delivered: usize,
    pub removed: usize,
}

pub struct Broadcaster {
    controller: Arc<FanController>,
    subscribers: Mutex<HashMap<SubscriberId, watch::Sender<Option<ServerMessage>>>>,
}

impl Broadcaster {
    pub fn new(controller: Arc<FanController>) -> Self {
        Self {
            controller,
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a subscriber. Only snapshots pushed after this call are seen.
    pub async fn subscribe(&self) -> Subscription {
        let (sender, latest) = watch::channel(None);
        let id = Uuid::new_v4();
        self.subscribers.lock().await.insert(id, sender);
        tracing::debug!("Subscriber {} registered", id);

        Subscription { id, latest }
    }

    /// Remove a subscriber; unknown ids are ignored
    pub async fn unsubscribe(&self, id: SubscriberId) {
        if self.subscribers.lock().await.remove(&id).is_some() {
            tracing::debug!("Subscriber {} removed", id);
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Take one snapshot of every channel and push it to all subscribers
    pub async fn tick(&self) -> TickReport {
        let mut subscribers = self.subscribers.lock().await;
        let message = ServerMessage::FanStatus(self.controller.status_all().await);

        let mut report = TickReport::default();
        subscribers.retain(|id, sender| match sender.send(Some(message.clone())) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(_) => {
                tracing::warn!("Dropping disconnected subscriber {}", id);
                report.removed += 1;
                false
            }
        });

        report
    }
}
