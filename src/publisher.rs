// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! Encodes payloads as JSON and publishes them to an exchange with the
//! `application/json` content type. No other envelope metadata is attached.

use crate::{channel::BrokerChannel, errors::AmqpError};
use lapin::{options::BasicPublishOptions, types::ShortString, BasicProperties};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Publishes JSON payloads on a shared channel.
pub struct RabbitMQPublisher {
    channel: Arc<dyn BrokerChannel>,
    debug: bool,
}

impl RabbitMQPublisher {
    /// Creates a new RabbitMQ publisher.
    ///
    /// With `debug` on, every outgoing payload is logged in full.
    pub fn new(channel: Arc<dyn BrokerChannel>, debug: bool) -> RabbitMQPublisher {
        RabbitMQPublisher { channel, debug }
    }

    /// Publishes `payload` to `exchange` with an empty routing key.
    ///
    /// The exchange must already exist.
    pub async fn publish<T>(&self, exchange: &str, payload: &T) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        let data = encode(payload)?;

        if self.debug {
            info!(
                exchange,
                payload = %String::from_utf8_lossy(&data),
                "producer is running for messages"
            );
        } else {
            info!(exchange, "producer is running for messages");
        }

        self.channel
            .basic_publish(
                exchange,
                "",
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                &data,
                BasicProperties::default().with_content_type(ShortString::from(JSON_CONTENT_TYPE)),
            )
            .await
    }
}

/// Serializes a payload into the JSON bytes sent on the wire.
pub fn encode<T>(payload: &T) -> Result<Vec<u8>, AmqpError>
where
    T: Serialize + ?Sized,
{
    serde_json::to_vec(payload).map_err(|err| {
        error!(error = err.to_string(), "error to encode the payload");
        AmqpError::ParsePayloadError(err.to_string())
    })
}
