// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Topology
//!
//! This module defines the declarative topology the connector consumes from
//! its YAML file: a sequence of exchange specifications, each carrying the
//! topics to subscribe to. It also realizes a specification on an AMQP
//! channel by declaring the exchange (when requested), declaring one durable
//! queue per topic under a deterministic name, and binding each queue with
//! the topic as routing key.
//!
//! Queue names follow `OpenFaaS_<exchange>_<topic>` and are part of the
//! external contract; operators may monitor or provision them out-of-band.

use crate::errors::AmqpError;
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel,
};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::fs;
use thiserror::Error;
use tracing::{debug, error};

/// Prefix shared by every queue the connector declares
const QUEUE_PREFIX: &str = "OpenFaaS";

/// Errors reported while loading or validating the topology file.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failure to read the topology file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failure to parse the topology file: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("topology contains an exchange without a name")]
    EmptyName,

    #[error("exchange `{0}` appears more than once in the topology")]
    DuplicateExchange(String),

    #[error("exchange `{0}` does not list any topics")]
    EmptyTopics(String),
}

/// The exchange types the connector understands.
///
/// Any other value coming from the topology file is normalized to `Direct`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExchangeType {
    #[default]
    Direct,
    Topic,
}

impl ExchangeType {
    /// Normalizes a raw type string from the topology file.
    pub fn normalize(raw: &str) -> ExchangeType {
        match raw.to_lowercase().as_str() {
            "topic" => ExchangeType::Topic,
            _ => ExchangeType::Direct,
        }
    }
}

impl From<ExchangeType> for lapin::ExchangeKind {
    fn from(kind: ExchangeType) -> lapin::ExchangeKind {
        match kind {
            ExchangeType::Direct => lapin::ExchangeKind::Direct,
            ExchangeType::Topic => lapin::ExchangeKind::Topic,
        }
    }
}

fn deserialize_exchange_type<'de, D>(deserializer: D) -> Result<ExchangeType, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(ExchangeType::normalize(&raw))
}

/// Specification of one exchange the connector consumes from.
///
/// `declare` controls whether the connector declares the exchange itself or
/// assumes it pre-exists on the broker. `durable` and `auto_deleted` are
/// inherited by every per-topic queue.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSpec {
    pub name: String,

    pub topics: Vec<String>,

    #[serde(default)]
    pub declare: bool,

    #[serde(
        rename = "type",
        default,
        deserialize_with = "deserialize_exchange_type"
    )]
    pub kind: ExchangeType,

    #[serde(default)]
    pub durable: bool,

    #[serde(rename = "auto-deleted", default)]
    pub auto_deleted: bool,
}

/// The ordered sequence of exchange specifications for one connector run.
///
/// Immutable once loaded; recovery re-realizes the same topology.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct Topology(Vec<ExchangeSpec>);

impl Topology {
    /// Loads and validates a topology from a YAML file.
    pub fn from_file(path: &str) -> Result<Topology, TopologyError> {
        let raw = fs::read_to_string(path)?;
        Topology::parse(&raw)
    }

    /// Parses and validates a topology from raw YAML.
    pub fn parse(raw: &str) -> Result<Topology, TopologyError> {
        let topology: Topology = serde_yaml::from_str(raw)?;
        topology.validate()?;
        Ok(topology)
    }

    pub fn exchanges(&self) -> &[ExchangeSpec] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    fn validate(&self) -> Result<(), TopologyError> {
        let mut seen = HashSet::new();

        for spec in &self.0 {
            if spec.name.is_empty() {
                return Err(TopologyError::EmptyName);
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(TopologyError::DuplicateExchange(spec.name.clone()));
            }
            if spec.topics.is_empty() {
                return Err(TopologyError::EmptyTopics(spec.name.clone()));
            }
        }

        Ok(())
    }
}

/// Returns the deterministic queue name for an (exchange, topic) pair.
pub fn queue_name(exchange: &str, topic: &str) -> String {
    format!("{}_{}_{}", QUEUE_PREFIX, exchange, topic)
}

/// Realizes an exchange specification on the given channel.
///
/// This declares the exchange when `declare` is set, then declares one queue
/// per topic with the exchange's `durable`/`auto_deleted` flags and binds it
/// using the topic as routing key. Any failure aborts the current run.
///
/// # Returns
/// Ok(()) on success or the first `AmqpError` encountered.
pub async fn realize(channel: &Channel, spec: &ExchangeSpec) -> Result<(), AmqpError> {
    if spec.declare {
        debug!("declaring exchange: {}", spec.name);

        match channel
            .exchange_declare(
                &spec.name,
                spec.kind.clone().into(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: spec.durable,
                    auto_delete: spec.auto_deleted,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = spec.name.as_str(),
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(spec.name.clone()))
            }
            _ => Ok(()),
        }?;

        debug!("exchange: {} was declared", spec.name);
    }

    for topic in &spec.topics {
        let queue = queue_name(&spec.name, topic);
        debug!("declaring queue: {}", queue);

        match channel
            .queue_declare(
                &queue,
                QueueDeclareOptions {
                    passive: false,
                    durable: spec.durable,
                    exclusive: false,
                    auto_delete: spec.auto_deleted,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = queue.as_str(),
                    "error to declare the queue"
                );
                Err(AmqpError::DeclareQueueError(queue.clone()))
            }
            _ => Ok(()),
        }?;

        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue, spec.name, topic
        );

        match channel
            .queue_bind(
                &queue,
                &spec.name,
                topic,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingQueueError(spec.name.clone(), queue.clone()))
            }
            _ => Ok(()),
        }?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_normalization() {
        assert_eq!(ExchangeType::normalize("direct"), ExchangeType::Direct);
        assert_eq!(ExchangeType::normalize("topic"), ExchangeType::Topic);
        assert_eq!(ExchangeType::normalize("TOPIC"), ExchangeType::Topic);
        assert_eq!(ExchangeType::normalize("fanout"), ExchangeType::Direct);
        assert_eq!(ExchangeType::normalize("headers"), ExchangeType::Direct);
        assert_eq!(ExchangeType::normalize(""), ExchangeType::Direct);
        assert_eq!(ExchangeType::normalize("x-delayed"), ExchangeType::Direct);
    }

    #[test]
    fn test_queue_name_format() {
        assert_eq!(queue_name("AEx", "Foo"), "OpenFaaS_AEx_Foo");
        assert_eq!(queue_name("Billing", "invoice"), "OpenFaaS_Billing_invoice");
    }

    #[test]
    fn test_parse_topology() {
        let raw = r#"
- name: Exchange
  topics: ["Foo", "Bar"]
  declare: true
  type: topic
  durable: true
  auto-deleted: false
- name: Other
  topics: ["Baz"]
  declare: false
"#;

        let topology = Topology::parse(raw).unwrap();
        assert_eq!(topology.len(), 2);

        let first = &topology.exchanges()[0];
        assert_eq!(first.name, "Exchange");
        assert_eq!(first.topics, vec!["Foo", "Bar"]);
        assert!(first.declare);
        assert_eq!(first.kind, ExchangeType::Topic);
        assert!(first.durable);
        assert!(!first.auto_deleted);

        let second = &topology.exchanges()[1];
        assert_eq!(second.kind, ExchangeType::Direct);
        assert!(!second.declare);
        assert!(!second.durable);
    }

    #[test]
    fn test_parse_normalizes_unknown_type() {
        let raw = r#"
- name: Exchange
  topics: ["Foo"]
  declare: true
  type: fanout
"#;

        let topology = Topology::parse(raw).unwrap();
        assert_eq!(topology.exchanges()[0].kind, ExchangeType::Direct);
    }

    #[test]
    fn test_validation_rejects_empty_topics() {
        let raw = r#"
- name: Exchange
  topics: []
  declare: true
"#;

        assert!(matches!(
            Topology::parse(raw),
            Err(TopologyError::EmptyTopics(_))
        ));
    }

    #[test]
    fn test_validation_rejects_duplicate_names() {
        let raw = r#"
- name: Exchange
  topics: ["Foo"]
- name: Exchange
  topics: ["Bar"]
"#;

        assert!(matches!(
            Topology::parse(raw),
            Err(TopologyError::DuplicateExchange(_))
        ));
    }

    #[test]
    fn test_validation_rejects_empty_name() {
        let raw = r#"
- name: ""
  topics: ["Foo"]
"#;

        assert!(matches!(Topology::parse(raw), Err(TopologyError::EmptyName)));
    }
}
