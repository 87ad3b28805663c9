// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Development tool that publishes a sample message on a topic every two
//! seconds, declaring the target exchange first. Useful for driving a local
//! connector without a real producer.
//!
//! Environment: `RMQ_HOST`, `RMQ_PORT`, `RMQ_USER`, `RMQ_PASS` select the
//! broker; `PRODUCER_EXCHANGE` and `PRODUCER_TOPIC` select the destination.

use lapin::{
    options::ExchangeDeclareOptions, types::FieldTable, Connection, ConnectionProperties,
    ExchangeKind,
};
use rabbitmq_connector::publisher::TopicPublisher;
use std::env;
use std::time::Duration;
use tracing::info;

fn read_from_env(env: &str, fallback: &str) -> String {
    env::var(env).unwrap_or_else(|_| fallback.to_owned())
}

fn connection_url() -> String {
    let user = read_from_env("RMQ_USER", "guest");
    let pass = read_from_env("RMQ_PASS", "guest");
    let host = read_from_env("RMQ_HOST", "localhost");
    let port = read_from_env("RMQ_PORT", "5672");
    format!("amqp://{}:{}@{}:{}", user, pass, host, port)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let exchange = read_from_env("PRODUCER_EXCHANGE", "OpenFaasEx");
    let topic = read_from_env("PRODUCER_TOPIC", "account");

    let connection =
        Connection::connect(&connection_url(), ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;

    channel
        .exchange_declare(
            &exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    let publisher = TopicPublisher::new(channel);
    let mut ticker = tokio::time::interval(Duration::from_secs(2));

    loop {
        ticker.tick().await;

        publisher
            .publish(&exchange, &topic, b"account related info", "text/plain")
            .await?;

        info!(
            exchange = exchange.as_str(),
            topic = topic.as_str(),
            "sent sample message"
        );
    }
}
