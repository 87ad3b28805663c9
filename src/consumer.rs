// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Per-Delivery Dispatch
//!
//! This module processes one delivery at a time: it filters by routing key,
//! invokes the functions registered for the topic, and settles the delivery
//! with the broker. Acknowledgement, negative acknowledgement and rejection
//! are each retried a bounded number of times; after that the delivery is
//! abandoned unacknowledged and the broker redelivers it once the channel
//! closes.
//!
//! A delivery is always settled on the channel that delivered it; the acker
//! travels with the delivery into the spawned task.

use crate::client::Invocation;
use crate::controller::TopicInvoker;
use crate::otel;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions},
};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use std::{borrow::Cow, mem, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Attempts per broker-side settlement operation
const SETTLE_ATTEMPTS: u32 = 3;

/// Pause between settlement attempts
const SETTLE_BACKOFF: Duration = Duration::from_millis(300);

/// Handles a single delivery read from the queue bound to `topic`.
///
/// A mismatched routing key indicates queue-binding drift; the delivery is
/// rejected with requeue so the correct consumer can still pick it up. A
/// matching delivery is dispatched through the invoker and acked on success
/// or nacked with requeue on failure.
pub(crate) async fn dispatch(
    tracer: &BoxedTracer,
    mut delivery: Delivery,
    topic: &str,
    invoker: Arc<dyn TopicInvoker>,
) {
    if delivery.routing_key.as_str() != topic {
        warn!(
            routing_key = delivery.routing_key.as_str(),
            topic, "received delivery with mismatched routing key, requeueing"
        );
        reject_with_retry(&delivery).await;
        return;
    }

    let invocation = Invocation {
        topic: topic.to_owned(),
        message: if delivery.data.is_empty() {
            None
        } else {
            Some(mem::take(&mut delivery.data))
        },
        content_type: delivery
            .properties
            .content_type()
            .clone()
            .map(|value| value.to_string())
            .unwrap_or_default(),
        content_encoding: delivery
            .properties
            .content_encoding()
            .clone()
            .map(|value| value.to_string())
            .unwrap_or_default(),
    };

    let (_ctx, mut span) = otel::consumer_span(&delivery.properties, tracer, topic);

    match invoker.invoke(topic, &invocation).await {
        Ok(()) => {
            debug!(topic, "message successfully processed");

            if ack_with_retry(&delivery).await {
                span.set_status(Status::Ok);
            } else {
                span.set_status(Status::Error {
                    description: Cow::from("error to ack msg"),
                });
            }
        }
        Err(err) => {
            error!(
                error = err.to_string(),
                topic, "error while handling message, requeueing for later"
            );
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("invocation failed"),
            });

            nack_with_retry(&delivery).await;
        }
    }
}

/// Acknowledges the delivery, retrying on error. Returns whether the broker
/// accepted the ack.
pub(crate) async fn ack_with_retry(delivery: &Delivery) -> bool {
    for attempt in 1..=SETTLE_ATTEMPTS {
        match delivery.ack(BasicAckOptions { multiple: false }).await {
            Ok(()) => return true,
            Err(err) => {
                warn!(error = err.to_string(), attempt, "error while acking message");
                sleep(SETTLE_BACKOFF).await;
            }
        }
    }

    error!(
        attempts = SETTLE_ATTEMPTS,
        "giving up on ack, leaving delivery unacknowledged"
    );
    false
}

/// Negative-acknowledges the delivery with requeue, retrying on error.
pub(crate) async fn nack_with_retry(delivery: &Delivery) -> bool {
    for attempt in 1..=SETTLE_ATTEMPTS {
        match delivery
            .nack(BasicNackOptions {
                multiple: false,
                requeue: true,
            })
            .await
        {
            Ok(()) => return true,
            Err(err) => {
                warn!(error = err.to_string(), attempt, "error while nacking message");
                sleep(SETTLE_BACKOFF).await;
            }
        }
    }

    error!(
        attempts = SETTLE_ATTEMPTS,
        "giving up on nack, leaving delivery unacknowledged"
    );
    false
}

/// Rejects the delivery with requeue, retrying on error.
pub(crate) async fn reject_with_retry(delivery: &Delivery) -> bool {
    for attempt in 1..=SETTLE_ATTEMPTS {
        match delivery.reject(BasicRejectOptions { requeue: true }).await {
            Ok(()) => return true,
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    attempt, "error while rejecting message"
                );
                sleep(SETTLE_BACKOFF).await;
            }
        }
    }

    error!(
        attempts = SETTLE_ATTEMPTS,
        "giving up on reject, leaving delivery unacknowledged"
    );
    false
}
