// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! Small publisher used by the producer tool to feed sample messages into an
//! exchange. Every message gets a content type, a fresh message id and the
//! current trace context injected into its headers.

use crate::errors::AmqpError;
use crate::otel::AmqpTracePropagator;
use lapin::{
    options::BasicPublishOptions,
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel,
};
use opentelemetry::{global, Context};
use std::collections::BTreeMap;
use tracing::error;
use uuid::Uuid;

/// Publishes payloads onto an exchange keyed by topic.
pub struct TopicPublisher {
    channel: Channel,
}

impl TopicPublisher {
    pub fn new(channel: Channel) -> TopicPublisher {
        TopicPublisher { channel }
    }

    /// Publishes `payload` on `exchange` using `topic` as routing key.
    pub async fn publish(
        &self,
        exchange: &str,
        topic: &str,
        payload: &[u8],
        content_type: &str,
    ) -> Result<(), AmqpError> {
        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();

        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(
                &Context::current(),
                &mut AmqpTracePropagator::new(&mut headers),
            )
        });

        match self
            .channel
            .basic_publish(
                exchange,
                topic,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                BasicProperties::default()
                    .with_content_type(ShortString::from(content_type))
                    .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
                    .with_headers(FieldTable::from(headers)),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError)
            }
            _ => Ok(()),
        }
    }
}
