// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Façade
//!
//! `AmqpError` covers every failure the crate surfaces: acquiring the shared
//! connection, declaring topology, publishing and consuming. Lapin errors are
//! logged where they happen and carried here as their rendered message, which
//! keeps the enum `Clone` so it can travel inside a `ConnectionResult`.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// The broker is switched off in configuration, no connection was attempted
    #[error("broker unavailable")]
    BrokerUnavailable,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error closing the channel or the connection
    #[error("failure to close: {0}")]
    CloseError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error deleting an exchange with the given name
    #[error("failure to delete an exchange `{0}`")]
    DeleteExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error publishing a message
    #[error("failure to publish to `{0}`")]
    PublishingError(String),

    /// Error encoding or decoding a message payload
    #[error("failure to parse payload: {0}")]
    ParsePayloadError(String),

    /// Error starting a consumer on a queue
    #[error("failure to declare consumer on `{0}`")]
    ConsumerDeclarationError(String),

    /// Error reading a delivery from a consumer stream
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// The message feature is switched off in configuration
    #[error("message unavailable (enabled = false)")]
    MessageUnavailable,
}

impl AmqpError {
    /// True for the errors that mean "switched off" rather than "broken".
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            AmqpError::BrokerUnavailable | AmqpError::MessageUnavailable
        )
    }
}
