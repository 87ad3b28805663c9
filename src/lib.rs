// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Connector for OpenFaaS
//!
//! Bridges a RabbitMQ broker to an OpenFaaS gateway: deliveries consumed
//! from per-topic queues are dispatched as HTTP invocations to every
//! function annotated with the delivery's topic. The topic-to-function
//! mapping is rebuilt periodically by crawling the gateway.
//!
//! ## Guarantees
//!
//! Invocation is at-least-once: a delivery is acked only after its
//! invocations succeeded, and redelivered by the broker otherwise. No
//! ordering is preserved, neither across topics nor within a topic, since
//! every delivery is dispatched on its own task. Consumers that need
//! ordering must put a serializing step behind the invoked function.

mod consumer;
mod otel;

pub mod cache;
pub mod channel;
pub mod client;
pub mod config;
pub mod connector;
pub mod controller;
pub mod errors;
pub mod exchange;
pub mod publisher;
pub mod shutdown;
pub mod topology;
