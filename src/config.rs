// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Configuration
//!
//! The configuration tree consumed by the connection manager and by the
//! config-driven topology and messaging operations. It deserializes from any
//! serde format, with every field defaulted, or loads from `RABBITMQ_*`
//! environment variables.

use crate::{
    exchange::{ExchangeConfig, ExchangeKind},
    queue::QueueConfig,
};
use serde::Deserialize;
use std::{env, str::FromStr};
use thiserror::Error;

pub const DEFAULT_SCHEME: &str = "amqp";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5672;
pub const DEFAULT_USER: &str = "guest";
pub const DEFAULT_PASSWORD: &str = "guest";
pub const DEFAULT_CONNECTION_NAME: &str = "rabbitmq-conn";

/// Configuration error type
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Settings for the message feature: whether it is on and which exchange and
/// queue the config-driven operations use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MessageConfigs {
    pub enabled: bool,
    pub exchange: ExchangeConfig,
    pub queue: QueueConfig,
}

/// Connection settings and feature flags for the broker.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RabbitMQConfigs {
    pub enabled: bool,
    pub debug: bool,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    pub connection_name: String,
    pub message: MessageConfigs,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        RabbitMQConfigs {
            enabled: false,
            debug: false,
            scheme: DEFAULT_SCHEME.to_owned(),
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_owned(),
            password: DEFAULT_PASSWORD.to_owned(),
            vhost: String::new(),
            connection_name: DEFAULT_CONNECTION_NAME.to_owned(),
            message: MessageConfigs::default(),
        }
    }
}

impl std::fmt::Debug for RabbitMQConfigs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitMQConfigs")
            .field("enabled", &self.enabled)
            .field("debug", &self.debug)
            .field("uri", &self.redacted_uri())
            .field("connection_name", &self.connection_name)
            .field("message", &self.message)
            .finish()
    }
}

impl RabbitMQConfigs {
    /// Loads the configuration from `RABBITMQ_*` environment variables.
    ///
    /// Unset variables fall back to the defaults; set-but-invalid ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = RabbitMQConfigs::default();
        let exchange = ExchangeConfig::default();
        let queue = QueueConfig::default();

        Ok(RabbitMQConfigs {
            enabled: env_parse("RABBITMQ_ENABLED", defaults.enabled)?,
            debug: env_parse("RABBITMQ_DEBUG", defaults.debug)?,
            scheme: env_or_default("RABBITMQ_SCHEME", &defaults.scheme),
            host: env_or_default("RABBITMQ_HOST", &defaults.host),
            port: env_parse("RABBITMQ_PORT", defaults.port)?,
            user: env_or_default("RABBITMQ_USER", &defaults.user),
            password: env_or_default("RABBITMQ_PASSWORD", &defaults.password),
            vhost: env_or_default("RABBITMQ_VHOST", &defaults.vhost),
            connection_name: env_or_default(
                "RABBITMQ_CONNECTION_NAME",
                &defaults.connection_name,
            ),
            message: MessageConfigs {
                enabled: env_parse("RABBITMQ_MESSAGE_ENABLED", defaults.message.enabled)?,
                exchange: ExchangeConfig {
                    name: env_or_default("RABBITMQ_EXCHANGE_NAME", &exchange.name),
                    kind: env_parse::<ExchangeKind>("RABBITMQ_EXCHANGE_KIND", exchange.kind)?,
                    durable: env_parse("RABBITMQ_EXCHANGE_DURABLE", exchange.durable)?,
                },
                queue: QueueConfig {
                    name: env_or_default("RABBITMQ_QUEUE_NAME", &queue.name),
                    durable: env_parse("RABBITMQ_QUEUE_DURABLE", queue.durable)?,
                },
            },
        })
    }

    /// AMQP URI for the configured broker.
    pub fn uri(&self) -> String {
        self.build_uri(&self.password)
    }

    /// Same as `uri` with the password masked, for logs.
    pub fn redacted_uri(&self) -> String {
        self.build_uri("****")
    }

    fn build_uri(&self, password: &str) -> String {
        // a bare "/" vhost has to be percent-encoded in the path
        let vhost = match self.vhost.as_str() {
            "/" => "%2f",
            v => v.trim_start_matches('/'),
        };

        format!(
            "{}://{}:{}@{}:{}/{}",
            self.scheme, self.user, password, self.host, self.port, vhost
        )
    }
}

/// Reads an environment variable, falling back to `default` when unset
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Reads and parses an environment variable, falling back to `default` when unset
pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::ParseError {
            key: key.to_owned(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
