// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! Declares and removes exchanges, declares queues and binds queues to
//! exchanges. Every operation has a parameterized form and, where the
//! configuration carries the values, a config-driven form that validates the
//! configured exchange/queue first.
//!
//! Declarations and bindings are idempotent at the broker, so all of them can
//! be re-invoked freely; nothing is tracked here.

use crate::{
    channel::BrokerChannel,
    config::MessageConfigs,
    connection::BrokerHandle,
    errors::AmqpError,
    exchange::ExchangeKind,
    queue::QueueInfo,
};
use async_trait::async_trait;
use lapin::options::{
    ExchangeDeclareOptions, ExchangeDeleteOptions, QueueBindOptions, QueueDeclareOptions,
};
use std::sync::Arc;
use tracing::debug;

/// Trait defining the interface for topology management.
#[async_trait]
pub trait Topology: Send + Sync {
    /// Declares an exchange; re-declaring with the same kind is a no-op.
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), AmqpError>;

    /// Declares the configured exchange.
    async fn declare_exchange_from_config(&self) -> Result<(), AmqpError>;

    /// Deletes an exchange whether or not it is in use.
    async fn remove_exchange(&self, name: &str) -> Result<(), AmqpError>;

    /// Declares a queue. An empty name lets the broker pick one.
    async fn declare_queue(&self, name: &str, durable: bool) -> Result<QueueInfo, AmqpError>;

    /// Declares the configured queue.
    async fn declare_queue_from_config(&self) -> Result<QueueInfo, AmqpError>;

    /// Binds a queue to an exchange with an empty routing key.
    async fn bind_queue_to_exchange(&self, queue: &str, exchange: &str) -> Result<(), AmqpError>;

    /// Binds the configured queue to the configured exchange.
    async fn bind_from_config(&self) -> Result<(), AmqpError>;
}

/// RabbitMQ implementation of the Topology trait.
pub struct AmqpTopology {
    channel: Arc<dyn BrokerChannel>,
    message: MessageConfigs,
}

impl AmqpTopology {
    /// Creates a topology service on `channel`, reading config-driven values from `message`.
    pub fn new(channel: Arc<dyn BrokerChannel>, message: MessageConfigs) -> AmqpTopology {
        AmqpTopology { channel, message }
    }

    /// Creates a topology service on the shared handle.
    pub fn from_handle(handle: &BrokerHandle) -> AmqpTopology {
        AmqpTopology::new(handle.channel(), handle.configs().message.clone())
    }
}

#[async_trait]
impl Topology for AmqpTopology {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", name);

        self.channel
            .exchange_declare(
                name,
                kind,
                ExchangeDeclareOptions {
                    passive: false,
                    durable,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
            )
            .await?;

        debug!("exchange: {} was created", name);
        Ok(())
    }

    async fn declare_exchange_from_config(&self) -> Result<(), AmqpError> {
        let exchange = self.message.exchange.validated();
        self.declare_exchange(&exchange.name, exchange.kind, exchange.durable)
            .await
    }

    async fn remove_exchange(&self, name: &str) -> Result<(), AmqpError> {
        self.channel
            .exchange_delete(
                name,
                ExchangeDeleteOptions {
                    if_unused: false,
                    nowait: false,
                },
            )
            .await?;

        debug!("exchange: {} was removed", name);
        Ok(())
    }

    async fn declare_queue(&self, name: &str, durable: bool) -> Result<QueueInfo, AmqpError> {
        debug!("creating queue: {}", name);

        let queue = self
            .channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: false,
                    durable,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
            )
            .await?;

        debug!("queue: {} was created", queue.name);
        Ok(queue)
    }

    async fn declare_queue_from_config(&self) -> Result<QueueInfo, AmqpError> {
        let queue = self.message.queue.validated();
        self.declare_queue(&queue.name, queue.durable).await
    }

    async fn bind_queue_to_exchange(&self, queue: &str, exchange: &str) -> Result<(), AmqpError> {
        self.channel
            .queue_bind(queue, exchange, "", QueueBindOptions { nowait: false })
            .await?;

        debug!("queue was bounded");
        Ok(())
    }

    async fn bind_from_config(&self) -> Result<(), AmqpError> {
        let exchange = self.message.exchange.validated();
        let queue = self.message.queue.validated();
        self.bind_queue_to_exchange(&queue.name, &exchange.name)
            .await
    }
}
