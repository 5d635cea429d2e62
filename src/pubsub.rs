//! Local publish/subscribe bus.
//!
//! Broadcast events that pass the domain and kind checks are decoded and handed
//! to this bus; locally published messages reach local subscribers here before
//! they are gossiped.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Message {
    pub topic: String,
    pub body: serde_json::Value,
}

impl Message {
    pub fn new(topic: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            body,
        }
    }
}

pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

pub trait PubSub: Send + Sync {
    fn subscribe(&self, topic: &str, handler: Handler);

    /// Deliver to every subscriber of `message.topic`, returning how many were called
    fn publish(&self, message: &Message) -> usize;
}

#[derive(Default)]
pub struct LocalBus {
    subscribers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self
            .subscribers
            .read()
            .map(|s| s.len())
            .unwrap_or_default();
        f.debug_struct("LocalBus").field("topics", &topics).finish()
    }
}

impl PubSub for LocalBus {
    fn subscribe(&self, topic: &str, handler: Handler) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.entry(topic.to_string()).or_default().push(handler);
    }

    fn publish(&self, message: &Message) -> usize {
        // Clone the handlers out so a handler may subscribe without deadlocking
        let handlers: Vec<Handler> = self
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&message.topic)
            .cloned()
            .unwrap_or_default();
        for handler in handlers.iter() {
            handler(message);
        }
        debug!(
            "Delivered message on '{}' to {} subscribers",
            message.topic,
            handlers.len()
        );
        handlers.len()
    }
}
