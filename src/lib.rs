// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Process-wide RabbitMQ façade: one shared connection per process, idempotent
//! exchange/queue/binding declaration, JSON publishing, and callback-driven
//! consumption on a background task.

pub mod channel;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod errors;
pub mod exchange;
pub mod messaging;
pub mod publisher;
pub mod queue;
pub mod topology;
