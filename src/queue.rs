// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Configuration
//!
//! `QueueConfig` describes a queue to declare, `QueueInfo` is what the broker
//! answers with once it has been declared.

use serde::Deserialize;

/// Name used when a configured queue has no name
pub const DEFAULT_QUEUE_NAME: &str = "default_queue";

/// Definition of a RabbitMQ queue: name and durability.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub name: String,
    pub durable: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            name: DEFAULT_QUEUE_NAME.to_owned(),
            durable: true,
        }
    }
}

impl QueueConfig {
    /// Creates a non-durable queue definition with the given name.
    pub fn new(name: &str) -> QueueConfig {
        QueueConfig {
            name: name.to_owned(),
            durable: false,
        }
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Returns a normalized copy with defaults substituted for empty fields.
    pub fn validated(&self) -> QueueConfig {
        let name = self.name.trim();

        QueueConfig {
            name: if name.is_empty() {
                DEFAULT_QUEUE_NAME.to_owned()
            } else {
                name.to_owned()
            },
            durable: self.durable,
        }
    }
}

/// Queue descriptor returned by the broker after a declaration.
///
/// `name` is the broker-generated one when the declaration used an empty name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

impl From<lapin::Queue> for QueueInfo {
    fn from(queue: lapin::Queue) -> Self {
        QueueInfo {
            name: queue.name().to_string(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        }
    }
}
