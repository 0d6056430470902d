// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Operations
//!
//! `BrokerChannel` is the set of channel operations the topology, publisher
//! and consumer layers need. `LapinChannel` implements it on top of a lapin
//! `Channel`, mapping every lapin failure to an `AmqpError` and logging it at
//! the point of failure.

use crate::{consumer::Delivery, errors::AmqpError, exchange::ExchangeKind, queue::QueueInfo};
use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, ExchangeDeleteOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Stream of inbound deliveries for one consumer.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// Channel operations used by this crate.
///
/// No operation takes an argument table: every declaration and binding is
/// issued with an empty one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
    ) -> Result<(), AmqpError>;

    async fn exchange_delete(
        &self,
        name: &str,
        options: ExchangeDeleteOptions,
    ) -> Result<(), AmqpError>;

    /// Declares a queue and returns the name the broker settled on.
    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
    ) -> Result<QueueInfo, AmqpError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        options: QueueBindOptions,
    ) -> Result<(), AmqpError>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;

    /// Starts a consumer on `queue` tagged `tag`.
    ///
    /// # Returns
    /// The deliveries as a stream, which ends when the consumer is cancelled
    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError>;

    /// Whether the channel is still usable.
    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// `BrokerChannel` backed by a lapin channel.
pub struct LapinChannel {
    channel: Arc<Channel>,
}

impl LapinChannel {
    /// Wraps a lapin channel.
    ///
    /// # Parameters
    /// * `channel` - A channel created on an open connection
    ///
    /// # Returns
    /// An Arc-wrapped LapinChannel for sharing between services
    pub fn new(channel: Channel) -> Arc<LapinChannel> {
        Arc::new(LapinChannel {
            channel: Arc::new(channel),
        })
    }
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
    ) -> Result<(), AmqpError> {
        debug!(name, kind = kind.as_str(), "declaring exchange");

        match self
            .channel
            .exchange_declare(name, kind.into(), options, FieldTable::default())
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name, "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(name.to_owned()))
            }
            _ => Ok(()),
        }
    }

    async fn exchange_delete(
        &self,
        name: &str,
        options: ExchangeDeleteOptions,
    ) -> Result<(), AmqpError> {
        debug!(name, "deleting exchange");

        match self.channel.exchange_delete(name, options).await {
            Err(err) => {
                error!(error = err.to_string(), name, "error to delete the exchange");
                Err(AmqpError::DeleteExchangeError(name.to_owned()))
            }
            _ => Ok(()),
        }
    }

    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
    ) -> Result<QueueInfo, AmqpError> {
        debug!(name, "declaring queue");

        match self
            .channel
            .queue_declare(name, options, FieldTable::default())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name, "error to declare the queue");
                Err(AmqpError::DeclareQueueError(name.to_owned()))
            }
            Ok(queue) => Ok(queue.into()),
        }
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        options: QueueBindOptions,
    ) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue, exchange, routing_key
        );

        match self
            .channel
            .queue_bind(queue, exchange, routing_key, options, FieldTable::default())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    exchange.to_owned(),
                    queue.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_publish(exchange, routing_key, options, payload, properties)
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError(exchange.to_owned()))
            }
            _ => Ok(()),
        }
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError> {
        let consumer = match self
            .channel
            .basic_consume(queue, consumer_tag, options, FieldTable::default())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::ConsumerDeclarationError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        Ok(consumer
            .map(|result| {
                result
                    .map(Delivery::from)
                    .map_err(|err| AmqpError::ConsumerError(err.to_string()))
            })
            .boxed())
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    async fn close(&self) -> Result<(), AmqpError> {
        if !self.is_open() {
            return Ok(());
        }

        debug!("closing amqp channel...");
        match self.channel.close(200, "closing").await {
            Err(err) => {
                error!(error = err.to_string(), "error to close the channel");
                Err(AmqpError::CloseError(err.to_string()))
            }
            _ => Ok(()),
        }
    }
}
