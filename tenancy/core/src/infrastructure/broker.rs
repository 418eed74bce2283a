// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// In-process Topic Broker
//
// One tokio broadcast channel per destination string. The broker knows nothing
// about tenants: every destination reaching it has already been authorized by
// the message channel guard.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub destination: String,
    /// Subject of the publishing principal
    pub sender: String,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

pub struct TopicBroker {
    topics: DashMap<String, broadcast::Sender<BrokerMessage>>,
    capacity: usize,
}

impl TopicBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, destination: &str) -> broadcast::Receiver<BrokerMessage> {
        self.topics
            .entry(destination.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Deliver to current subscribers; returns how many received it.
    pub fn publish(&self, message: BrokerMessage) -> usize {
        let Some(sender) = self.topics.get(&message.destination).map(|s| s.value().clone()) else {
            debug!(destination = %message.destination, "No subscribers for destination");
            return 0;
        };
        sender.send(message).unwrap_or(0)
    }

    /// Drop `destination` once its last receiver is gone.
    pub fn release(&self, destination: &str) -> bool {
        let removed = self
            .topics
            .remove_if(destination, |_, sender| sender.receiver_count() == 0)
            .is_some();
        if removed {
            debug!(destination, "topic released");
        }
        removed
    }

    /// Drop topics nobody listens to any more.
    pub fn prune(&self) -> usize {
        let before = self.topics.len();
        self.topics.retain(|_, sender| sender.receiver_count() > 0);
        before - self.topics.len()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

impl Default for TopicBroker {
    fn default() -> Self {
        Self::new(256)
    }
}
