// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topic Function Cache
//!
//! This module holds the mapping from topic to the functions subscribed to
//! it. Reads happen on the hot path (once per delivery) under a shared lock;
//! the refresher replaces the whole map once per tick under the exclusive
//! lock, so no lookup ever observes a partially-updated map.

use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Capability contract for the topic map consumed by the dispatch path and
/// maintained by the refresher.
pub trait TopicMap: Send + Sync {
    /// Returns the functions subscribed to `topic`, empty when unknown.
    fn lookup(&self, topic: &str) -> Vec<String>;

    /// Atomically replaces the whole map.
    fn replace(&self, update: HashMap<String, Vec<String>>);
}

/// Shared cache of topic to function names.
#[derive(Default)]
pub struct TopicFunctionCache {
    map: RwLock<HashMap<String, Vec<String>>>,
}

impl TopicFunctionCache {
    pub fn new() -> TopicFunctionCache {
        TopicFunctionCache {
            map: RwLock::new(HashMap::new()),
        }
    }
}

impl TopicMap for TopicFunctionCache {
    fn lookup(&self, topic: &str) -> Vec<String> {
        let map = self.map.read().expect("topic cache lock poisoned");
        map.get(topic).cloned().unwrap_or_default()
    }

    fn replace(&self, update: HashMap<String, Vec<String>>) {
        debug!("updating cache with {} entries", update.len());

        let mut map = self.map.write().expect("topic cache lock poisoned");
        *map = update;
    }
}

/// Builder used by the refresher to assemble a fresh topic map.
///
/// Topics are trimmed before insertion; tokens that are empty after trimming
/// are dropped. Function names keep their discovery order per topic, though
/// callers must not depend on it.
#[derive(Default)]
pub struct FunctionMapBuilder {
    target: HashMap<String, Vec<String>>,
}

impl FunctionMapBuilder {
    pub fn new() -> FunctionMapBuilder {
        FunctionMapBuilder {
            target: HashMap::new(),
        }
    }

    /// Registers `function` for the given raw topic token.
    pub fn append(&mut self, topic: &str, function: &str) {
        let key = topic.trim();

        if key.is_empty() {
            debug!("topic was empty after trimming, ignoring provided function");
            return;
        }

        self.target
            .entry(key.to_owned())
            .or_default()
            .push(function.to_owned());
    }

    /// Returns the map assembled from previous `append` calls.
    pub fn build(self) -> HashMap<String, Vec<String>> {
        self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_lookup_missing_topic_is_empty() {
        let cache = TopicFunctionCache::new();
        assert!(cache.lookup("unknown").is_empty());
    }

    #[test]
    fn test_replace_is_wholesale() {
        let cache = TopicFunctionCache::new();

        let mut first = HashMap::new();
        first.insert("billing".to_owned(), vec!["biller".to_owned()]);
        cache.replace(first);
        assert_eq!(cache.lookup("billing"), vec!["biller".to_owned()]);

        let mut second = HashMap::new();
        second.insert("transport".to_owned(), vec!["transporter".to_owned()]);
        cache.replace(second);

        assert!(cache.lookup("billing").is_empty());
        assert_eq!(cache.lookup("transport"), vec!["transporter".to_owned()]);
    }

    #[test]
    fn test_builder_trims_and_skips_empty_tokens() {
        let mut builder = FunctionMapBuilder::new();
        builder.append(" billing ", "biller");
        builder.append("", "ghost");
        builder.append("   ", "ghost");
        builder.append("billing", "invoicer");

        let map = builder.build();
        assert_eq!(map.len(), 1);
        assert_eq!(
            map.get("billing"),
            Some(&vec!["biller".to_owned(), "invoicer".to_owned()])
        );
    }

    #[test]
    fn test_annotation_of_only_commas_and_whitespace() {
        let mut builder = FunctionMapBuilder::new();
        for token in " , ,,  ,".split(',') {
            builder.append(token, "ghost");
        }

        assert!(builder.build().is_empty());
    }

    #[test]
    fn test_concurrent_lookup_during_replace() {
        let cache = Arc::new(TopicFunctionCache::new());

        let mut initial = HashMap::new();
        initial.insert("billing".to_owned(), vec!["old".to_owned()]);
        cache.replace(initial);

        let reader = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    let values = cache.lookup("billing");
                    assert!(
                        values == vec!["old".to_owned()] || values == vec!["new".to_owned()],
                        "observed a torn map: {:?}",
                        values
                    );
                }
            })
        };

        for _ in 0..100 {
            let mut update = HashMap::new();
            update.insert("billing".to_owned(), vec!["new".to_owned()]);
            cache.replace(update);
        }

        reader.join().unwrap();
    }
}
