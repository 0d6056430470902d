// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Configuration
//!
//! Exchange kinds and the `ExchangeConfig` used both for ad-hoc declarations
//! and for the process-level configuration. A config is never mutated in
//! place: `validated` hands back a normalized copy.

use serde::Deserialize;
use std::{fmt, str::FromStr};

/// Name used when a configured exchange has no name
pub const DEFAULT_EXCHANGE_NAME: &str = "default_exchange";

/// Represents the types of exchanges available in RabbitMQ.
///
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Routes based on message header values instead of routing keys
///
/// Every binding made by this crate uses an empty routing key, so only
/// `Fanout` routes the way callers usually expect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    #[default]
    Fanout,
    Direct,
    Topic,
    Headers,
}

impl ExchangeKind {
    /// The AMQP name of the kind, as used in logs and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
        }
    }
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = String;

    /// Parses a kind name case-insensitively. An empty string is the default kind.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "fanout" => Ok(ExchangeKind::Fanout),
            "direct" => Ok(ExchangeKind::Direct),
            "topic" => Ok(ExchangeKind::Topic),
            "headers" => Ok(ExchangeKind::Headers),
            other => Err(format!("unknown exchange kind `{other}`")),
        }
    }
}

/// Definition of a RabbitMQ exchange: name, kind and durability.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            name: DEFAULT_EXCHANGE_NAME.to_owned(),
            kind: ExchangeKind::Fanout,
            durable: true,
        }
    }
}

impl ExchangeConfig {
    /// Creates a non-durable fanout exchange definition with the given name.
    pub fn new(name: &str) -> ExchangeConfig {
        ExchangeConfig {
            name: name.to_owned(),
            kind: ExchangeKind::Fanout,
            durable: false,
        }
    }

    /// Sets the exchange type.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Returns a normalized copy with defaults substituted for empty fields.
    pub fn validated(&self) -> ExchangeConfig {
        let name = self.name.trim();

        ExchangeConfig {
            name: if name.is_empty() {
                DEFAULT_EXCHANGE_NAME.to_owned()
            } else {
                name.to_owned()
            },
            kind: self.kind,
            durable: self.durable,
        }
    }
}
