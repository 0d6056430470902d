// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Messaging Service
//!
//! Topic-style convenience over the topology service: a topic is a durable
//! fanout exchange, publishing declares the topic then sends JSON, and
//! subscribing declares the topic, a durable queue and the binding before
//! handing the consumer stream to a `ConsumptionLoop`.
//!
//! A subscription parks the calling task. `subscribe` parks it for good;
//! `subscribe_until` and the `consume_*` operations take a `Shutdown` that
//! releases it. Only one subscription should read from a handle's channel at
//! a time, and callers serialize topology changes; neither is guarded here.

use crate::{
    channel::BrokerChannel,
    config::RabbitMQConfigs,
    connection::BrokerHandle,
    consumer::{ConsumptionLoop, DeliveryHandler, Shutdown},
    errors::AmqpError,
    exchange::ExchangeKind,
    publisher::RabbitMQPublisher,
    topology::{AmqpTopology, Topology},
};
use lapin::options::BasicConsumeOptions;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Publishes to and subscribes on topics over the shared channel.
pub struct RabbitMQMessaging {
    channel: Arc<dyn BrokerChannel>,
    topology: AmqpTopology,
    publisher: RabbitMQPublisher,
    configs: RabbitMQConfigs,
}

impl RabbitMQMessaging {
    /// Creates the service on the shared handle, using its configuration.
    pub fn new(handle: &BrokerHandle) -> RabbitMQMessaging {
        RabbitMQMessaging::with_channel(handle.channel(), handle.configs().clone())
    }

    /// Creates the service on any channel, mostly for tests and custom transports.
    pub fn with_channel(
        channel: Arc<dyn BrokerChannel>,
        configs: RabbitMQConfigs,
    ) -> RabbitMQMessaging {
        RabbitMQMessaging {
            topology: AmqpTopology::new(channel.clone(), configs.message.clone()),
            publisher: RabbitMQPublisher::new(channel.clone(), configs.debug),
            channel,
            configs,
        }
    }

    /// The topology service this messaging service declares through.
    pub fn topology(&self) -> &AmqpTopology {
        &self.topology
    }

    /// Declares a durable fanout exchange named `topic`.
    pub async fn create_topic(&self, topic: &str) -> Result<(), AmqpError> {
        self.topology
            .declare_exchange(topic, ExchangeKind::Fanout, true)
            .await
    }

    /// Deletes the topic's exchange, even while queues are still bound to it.
    ///
    /// # Parameters
    /// * `topic` - Name of the exchange to delete
    ///
    /// # Returns
    /// Ok(()) once the broker confirms, `DeleteExchangeError` otherwise
    pub async fn remove_topic(&self, topic: &str) -> Result<(), AmqpError> {
        self.topology.remove_exchange(topic).await
    }

    /// Declares the topic if needed and publishes `payload` to it as JSON.
    pub async fn publish<T>(&self, topic: &str, payload: &T) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        self.produce_with(topic, ExchangeKind::Fanout, true, payload)
            .await
    }

    /// Declares the exchange and publishes `payload` to it as JSON.
    pub async fn produce_with<T>(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        durable: bool,
        payload: &T,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        self.topology.declare_exchange(exchange, kind, durable).await?;
        self.publisher.publish(exchange, payload).await
    }

    /// Publishes to the configured exchange.
    ///
    /// Fails with `MessageUnavailable` before any broker call when the message
    /// feature is off.
    pub async fn produce_from_config<T>(&self, payload: &T) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        self.ensure_message_enabled()?;

        let exchange = self.configs.message.exchange.validated();
        self.produce_with(&exchange.name, exchange.kind, exchange.durable, payload)
            .await
    }

    /// Subscribes `queue` to `topic` and dispatches deliveries for the rest of
    /// the process. Returns only on a setup failure.
    pub async fn subscribe(
        &self,
        topic: &str,
        queue: &str,
        handler: Option<Arc<dyn DeliveryHandler>>,
    ) -> Result<(), AmqpError> {
        self.subscribe_until(topic, queue, handler, Shutdown::never())
            .await
    }

    /// Same as `subscribe`, returning once `shutdown` fires.
    pub async fn subscribe_until(
        &self,
        topic: &str,
        queue: &str,
        handler: Option<Arc<dyn DeliveryHandler>>,
        shutdown: Shutdown,
    ) -> Result<(), AmqpError> {
        self.consume_with(queue, topic, ExchangeKind::Fanout, true, handler, shutdown)
            .await
    }

    /// Declares the exchange and a queue, binds them, and consumes the queue
    /// with auto-acknowledgement until `shutdown` fires.
    ///
    /// The queue takes the exchange's durability.
    pub async fn consume_with(
        &self,
        queue: &str,
        exchange: &str,
        kind: ExchangeKind,
        durable: bool,
        handler: Option<Arc<dyn DeliveryHandler>>,
        shutdown: Shutdown,
    ) -> Result<(), AmqpError> {
        if kind != ExchangeKind::Fanout {
            warn!(
                exchange,
                kind = kind.as_str(),
                "binding with an empty routing key, only fanout exchanges route every message"
            );
        }

        self.topology.declare_exchange(exchange, kind, durable).await?;
        let declared = self.topology.declare_queue(queue, durable).await?;
        self.topology
            .bind_queue_to_exchange(&declared.name, exchange)
            .await?;

        let tag = format!("consumer-{}", Uuid::new_v4());
        let stream = self
            .channel
            .basic_consume(
                &declared.name,
                &tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: true,
                    exclusive: false,
                    nowait: false,
                },
            )
            .await?;

        info!(
            exchange,
            queue = declared.name.as_str(),
            "consumer is waiting for messages..."
        );

        ConsumptionLoop::new(stream, handler)
            .run_until(shutdown)
            .await
    }

    /// Consumes the configured queue bound to the configured exchange.
    ///
    /// Like `consume_with`, the queue is declared with the exchange's
    /// durability: `message.queue.durable` is not read here, only the queue
    /// name is. Use `Topology::declare_queue_from_config` beforehand to get a
    /// queue with its own configured durability.
    ///
    /// Fails with `MessageUnavailable` before any broker call when the message
    /// feature is off.
    pub async fn consume_from_config(
        &self,
        handler: Option<Arc<dyn DeliveryHandler>>,
        shutdown: Shutdown,
    ) -> Result<(), AmqpError> {
        self.ensure_message_enabled()?;

        let exchange = self.configs.message.exchange.validated();
        let queue = self.configs.message.queue.validated();
        self.consume_with(
            &queue.name,
            &exchange.name,
            exchange.kind,
            exchange.durable,
            handler,
            shutdown,
        )
        .await
    }

    fn ensure_message_enabled(&self) -> Result<(), AmqpError> {
        if !self.configs.message.enabled {
            warn!("message unavailable (enabled = false)");
            return Err(AmqpError::MessageUnavailable);
        }
        Ok(())
    }
}
