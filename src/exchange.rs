// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Runtime
//!
//! A running exchange pairs one exchange specification with one AMQP channel
//! and one consumer per topic. Deliveries are handed to a short-lived task
//! each, so neither topics nor deliveries within a topic are processed in
//! order.
//!
//! Runtimes are started once and never restarted: recovery after a broker
//! close builds fresh runtimes instead of reviving stopped ones.

use crate::channel::{self, ChannelCreator, REPLY_SUCCESS};
use crate::consumer;
use crate::controller::TopicInvoker;
use crate::errors::AmqpError;
use crate::topology::{self, ExchangeSpec};
use futures_util::StreamExt;
use lapin::{options::BasicConsumeOptions, types::FieldTable, Channel};
use opentelemetry::global;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Builds started exchange runtimes from specifications.
///
/// The factory asks the supervisor for a fresh channel, realizes the
/// specification's topology on it, and hands both to the runtime. It is
/// reused across recoveries since it holds no per-connection state.
pub struct ExchangeFactory {
    creator: Arc<dyn ChannelCreator>,
    invoker: Arc<dyn TopicInvoker>,
}

impl ExchangeFactory {
    pub fn new(creator: Arc<dyn ChannelCreator>, invoker: Arc<dyn TopicInvoker>) -> ExchangeFactory {
        ExchangeFactory { creator, invoker }
    }

    /// Produces a runtime for the given specification with its exchange,
    /// queues and bindings already in place on a dedicated channel.
    pub async fn build(&self, spec: &ExchangeSpec) -> Result<ExchangeRuntime, AmqpError> {
        let channel = self.creator.create_channel().await?;
        topology::realize(&channel, spec).await?;

        Ok(ExchangeRuntime::new(
            channel,
            spec.clone(),
            self.invoker.clone(),
        ))
    }
}

/// The live consumer cluster for one exchange.
pub struct ExchangeRuntime {
    channel: Channel,
    spec: ExchangeSpec,
    invoker: Arc<dyn TopicInvoker>,
    consumers: Vec<JoinHandle<()>>,
    running: bool,
}

impl ExchangeRuntime {
    fn new(channel: Channel, spec: ExchangeSpec, invoker: Arc<dyn TopicInvoker>) -> ExchangeRuntime {
        ExchangeRuntime {
            channel,
            spec,
            invoker,
            consumers: Vec::new(),
            running: false,
        }
    }

    /// Registers one consumer per topic and spawns their delivery loops.
    ///
    /// Consumers use manual acknowledgement and a broker-assigned consumer
    /// tag. A subscribe failure is returned as-is; the orchestrator aborts
    /// the current run in that case.
    pub async fn start(&mut self) -> Result<(), AmqpError> {
        self.observe_channel_state();

        for topic in self.spec.topics.clone() {
            let queue = topology::queue_name(&self.spec.name, &topic);

            let consumer = match self
                .channel
                .basic_consume(
                    &queue,
                    "",
                    BasicConsumeOptions {
                        no_local: false,
                        no_ack: false,
                        exclusive: false,
                        nowait: false,
                    },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        queue = queue.as_str(),
                        "error to create the consumer"
                    );
                    Err(AmqpError::ConsumerError(queue.clone()))
                }
                Ok(consumer) => Ok(consumer),
            }?;

            let invoker = self.invoker.clone();
            self.consumers.push(tokio::spawn(async move {
                let mut consumer = consumer;

                while let Some(result) = consumer.next().await {
                    match result {
                        Ok(delivery) => {
                            let invoker = invoker.clone();
                            let topic = topic.clone();

                            tokio::spawn(async move {
                                let tracer = global::tracer("amqp consumer");
                                consumer::dispatch(&tracer, delivery, &topic, invoker).await;
                            });
                        }
                        Err(err) => {
                            error!(error = err.to_string(), "error while consuming message")
                        }
                    }
                }

                debug!(topic = topic.as_str(), "consumer stream was closed");
            }));

            debug!(
                queue = queue.as_str(),
                "successfully started consumer on queue"
            );
        }

        self.running = true;
        info!(
            exchange = self.spec.name.as_str(),
            topics = self.spec.topics.len(),
            "exchange runtime started"
        );
        Ok(())
    }

    /// Closes the channel, which ends every consumer stream of this runtime.
    ///
    /// In-flight dispatch tasks run to completion on the acker they already
    /// hold; their settlement fails against the closed channel and the broker
    /// redelivers those messages.
    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        info!(
            exchange = self.spec.name.as_str(),
            "stopping exchange runtime"
        );

        if let Err(err) = self
            .channel
            .close(REPLY_SUCCESS, "exchange runtime stopped")
            .await
        {
            warn!(error = err.to_string(), "error while closing the channel");
        }

        for handle in self.consumers.drain(..) {
            let _ = handle.await;
        }
    }

    /// Logs the terminal close event of this runtime's channel.
    fn observe_channel_state(&self) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.channel.on_error(move |err| {
            let _ = tx.send(err);
        });

        let exchange = self.spec.name.clone();
        tokio::spawn(async move {
            if let Some(err) = rx.recv().await {
                if channel::is_recoverable(&err) {
                    warn!(
                        error = err.to_string(),
                        exchange = exchange.as_str(),
                        "received non critical error on channel"
                    );
                } else {
                    error!(
                        error = err.to_string(),
                        exchange = exchange.as_str(),
                        "received critical error on channel"
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Invocation;
    use crate::errors::OpenFaaSError;
    use crate::topology::Topology;
    use async_trait::async_trait;

    struct FailingCreator;

    #[async_trait]
    impl ChannelCreator for FailingCreator {
        async fn create_channel(&self) -> Result<Channel, AmqpError> {
            Err(AmqpError::MissingConnectionError)
        }
    }

    struct NoopInvoker;

    #[async_trait]
    impl TopicInvoker for NoopInvoker {
        async fn invoke(
            &self,
            _topic: &str,
            _invocation: &Invocation,
        ) -> Result<(), OpenFaaSError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_factory_surfaces_channel_failures() {
        let factory = ExchangeFactory::new(Arc::new(FailingCreator), Arc::new(NoopInvoker));

        let topology = Topology::parse(
            r#"
- name: AEx
  topics: ["Foo"]
  declare: true
"#,
        )
        .unwrap();

        let result = factory.build(&topology.exchanges()[0]).await;
        assert!(matches!(result, Err(AmqpError::MissingConnectionError)));
    }
}
