// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Runs against a live RabbitMQ configured through `RABBITMQ_*` variables.
//!
//! `cargo test -- --ignored` with a broker on localhost:5672.

use rabbitmq_conn::{
    config::RabbitMQConfigs,
    connection::ConnectionManager,
    consumer::{Delivery, Shutdown},
    errors::AmqpError,
    exchange::ExchangeKind,
    messaging::RabbitMQMessaging,
    topology::{AmqpTopology, Topology},
};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use uuid::Uuid;

fn configs() -> RabbitMQConfigs {
    RabbitMQConfigs {
        enabled: true,
        ..RabbitMQConfigs::from_env().expect("valid RABBITMQ_* variables")
    }
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

#[tokio::test]
#[ignore = "needs a running RabbitMQ"]
async fn acquire_connects_once() {
    let manager = ConnectionManager::default();

    let (first, result) = manager.acquire(&configs()).await;
    assert!(result.connected, "{}", result.message);
    assert!(result.new_instance);

    let (second, result) = manager.acquire(&configs()).await;
    assert!(!result.new_instance);
    assert!(Arc::ptr_eq(first.as_ref().unwrap(), second.as_ref().unwrap()));

    manager.close().await.unwrap();
    let first = first.unwrap();
    assert!(!first.channel().is_open());
    assert!(!first.is_open());
}

#[tokio::test]
#[ignore = "needs a running RabbitMQ"]
async fn exchange_declare_is_idempotent() {
    let manager = ConnectionManager::default();
    let (handle, _) = manager.acquire(&configs()).await;
    let topology = AmqpTopology::from_handle(&handle.unwrap());

    let name = unique("exchange");
    for kind in [ExchangeKind::Fanout, ExchangeKind::Direct] {
        let name = format!("{name}-{kind}");
        topology.declare_exchange(&name, kind, true).await.unwrap();
        topology.declare_exchange(&name, kind, true).await.unwrap();
        topology.remove_exchange(&name).await.unwrap();
    }

    manager.close().await.unwrap();
}

#[tokio::test]
#[ignore = "needs a running RabbitMQ"]
async fn bind_to_missing_exchange_fails() {
    let manager = ConnectionManager::default();
    let (handle, _) = manager.acquire(&configs()).await;
    let topology = AmqpTopology::from_handle(&handle.unwrap());

    let queue = topology.declare_queue("", false).await.unwrap();
    assert!(!queue.name.is_empty());

    let missing = unique("missing");
    let err = topology
        .bind_queue_to_exchange(&queue.name, &missing)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        AmqpError::BindingExchangeToQueueError(missing, queue.name)
    );

    // the failed bind closes the channel on the broker side
    manager.close().await.ok();
}

#[tokio::test]
#[ignore = "needs a running RabbitMQ"]
async fn published_payload_reaches_subscriber() {
    let publisher_manager = ConnectionManager::default();
    let subscriber_manager = ConnectionManager::default();

    let (pub_handle, _) = publisher_manager.acquire(&configs()).await;
    let (sub_handle, _) = subscriber_manager.acquire(&configs()).await;
    let publisher = RabbitMQMessaging::new(&pub_handle.unwrap());
    let subscriber = RabbitMQMessaging::new(&sub_handle.unwrap());

    // non-durable exchange and queue, so neither survives a broker restart
    let topic = unique("orders");
    let queue = unique("q1");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = move |d: Delivery| {
        let _ = tx.send(d);
    };
    let (trigger, shutdown) = Shutdown::channel();

    let (sub_topic, sub_queue) = (topic.clone(), queue.clone());
    let subscription = tokio::spawn(async move {
        subscriber
            .consume_with(
                &sub_queue,
                &sub_topic,
                ExchangeKind::Fanout,
                false,
                Some(Arc::new(handler)),
                shutdown,
            )
            .await
    });

    // the queue only receives what is published after it is bound
    tokio::time::sleep(Duration::from_millis(500)).await;
    publisher
        .produce_with(&topic, ExchangeKind::Fanout, false, &json!({"id": 1}))
        .await
        .unwrap();

    let delivery = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("delivery within 5s")
        .unwrap();
    assert_eq!(delivery.content_type.as_deref(), Some("application/json"));
    assert_eq!(delivery.json::<serde_json::Value>().unwrap(), json!({"id": 1}));

    trigger.trigger();
    subscription.await.unwrap().unwrap();

    publisher.remove_topic(&topic).await.unwrap();
    publisher_manager.close().await.unwrap();
    subscriber_manager.close().await.unwrap();
}
