// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumption Loop
//!
//! A subscription hands its delivery stream to a `ConsumptionLoop`. The loop
//! spawns one tokio task that reads the stream in order and calls the
//! `DeliveryHandler` once per delivery, while the subscribing future parks on
//! a `Shutdown` signal. With `Shutdown::never()` that wait lasts for the rest
//! of the process, so subscribing is meant to be the last thing a dedicated
//! consumer task does.
//!
//! If the broker closes the stream the background task ends, but the wait
//! keeps parking until the signal fires. A handler that panics takes down the
//! background task only.

use crate::{channel::DeliveryStream, errors::AmqpError};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

/// Inbound message handed to a `DeliveryHandler`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl Delivery {
    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AmqpError> {
        serde_json::from_slice(&self.data).map_err(|err| {
            error!(error = err.to_string(), "error to decode the delivery");
            AmqpError::ParsePayloadError(err.to_string())
        })
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Delivery {
            exchange: delivery.exchange.to_string(),
            routing_key: delivery.routing_key.to_string(),
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            content_type: delivery
                .properties
                .content_type()
                .as_ref()
                .map(|c| c.to_string()),
            data: delivery.data,
        }
    }
}

/// Called once per delivery, in the order deliveries arrive.
pub trait DeliveryHandler: Send + Sync {
    fn handle(&self, delivery: Delivery);
}

impl<F> DeliveryHandler for F
where
    F: Fn(Delivery) + Send + Sync,
{
    fn handle(&self, delivery: Delivery) {
        self(delivery)
    }
}

/// Handler used when a subscription is started without one: logs each delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHandler;

impl DeliveryHandler for LogHandler {
    fn handle(&self, delivery: Delivery) {
        info!(
            exchange = delivery.exchange.as_str(),
            delivery_tag = delivery.delivery_tag,
            body = %String::from_utf8_lossy(&delivery.data),
            "received message"
        );
    }
}

/// Fires a `Shutdown`.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Releases every wait on the paired `Shutdown`, including waits that
    /// start after this call. Firing twice is harmless.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Signal that releases a subscription's blocking wait.
///
/// Dropping the trigger without firing it does not release the wait.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    rx: Option<watch::Receiver<bool>>,
}

impl Shutdown {
    /// A signal that never fires.
    pub fn never() -> Shutdown {
        Shutdown { rx: None }
    }

    /// A signal together with the trigger that fires it.
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Shutdown { rx: Some(rx) })
    }

    /// Resolves once the trigger has fired.
    pub async fn wait(self) {
        let Some(mut rx) = self.rx else {
            return std::future::pending().await;
        };

        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

/// Drains one delivery stream into one handler.
pub struct ConsumptionLoop {
    stream: DeliveryStream,
    handler: Arc<dyn DeliveryHandler>,
}

impl ConsumptionLoop {
    /// `None` selects `LogHandler`.
    pub fn new(stream: DeliveryStream, handler: Option<Arc<dyn DeliveryHandler>>) -> Self {
        let handler = handler.unwrap_or_else(|| Arc::new(LogHandler) as Arc<dyn DeliveryHandler>);
        ConsumptionLoop { stream, handler }
    }

    /// Spawns the background task without waiting on anything.
    pub fn spawn(self) -> JoinHandle<()> {
        let ConsumptionLoop {
            mut stream,
            handler,
        } = self;

        tokio::spawn(async move {
            while let Some(result) = stream.next().await {
                match result {
                    Ok(delivery) => {
                        debug!(delivery_tag = delivery.delivery_tag, "dispatching delivery");
                        handler.handle(delivery);
                    }
                    Err(err) => error!(error = err.to_string(), "errors consume msg"),
                }
            }

            warn!("consumer stream closed");
        })
    }

    /// Spawns the background task and parks until `shutdown` fires.
    ///
    /// A stream that ends on its own does not return from here.
    pub async fn run_until(self, shutdown: Shutdown) -> Result<(), AmqpError> {
        let task = self.spawn();

        shutdown.wait().await;

        debug!("shutdown requested, stopping consumer");
        task.abort();
        Ok(())
    }
}
