// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topic Map Controller
//!
//! The controller keeps the topic cache fresh and performs invocations on
//! behalf of the dispatch path. Its refresher task scans the gateway once
//! before handing back control, then ticks on the configured period: probe
//! namespace support, enumerate namespaces when available, fetch the
//! functions per namespace, and replace the cache with the freshly built map.
//!
//! A failing scan never leaves a partial map behind: either the scan
//! completes (possibly with empty contributions) and replaces the cache, or
//! the whole tick is skipped. Stale-but-complete beats partial.

use crate::cache::{FunctionMapBuilder, TopicMap};
use crate::client::{FunctionCrawler, Invocation};
use crate::errors::OpenFaaSError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Annotation key holding the comma-separated topic list of a function
const TOPIC_ANNOTATION: &str = "topic";

/// Capability used by the dispatch path to invoke every function subscribed
/// to a topic.
#[async_trait]
pub trait TopicInvoker: Send + Sync {
    /// Invokes all functions registered for `topic`, aborting on the first
    /// failure. An empty function list is a successful no-op.
    async fn invoke(&self, topic: &str, invocation: &Invocation) -> Result<(), OpenFaaSError>;
}

/// Maintains the topic cache and routes invocations through the gateway.
pub struct Controller<C> {
    client: C,
    cache: Arc<dyn TopicMap>,
    refresh_time: Duration,
}

impl<C: FunctionCrawler + 'static> Controller<C> {
    pub fn new(client: C, cache: Arc<dyn TopicMap>, refresh_time: Duration) -> Controller<C> {
        Controller {
            client,
            cache,
            refresh_time,
        }
    }

    /// Performs one scan before returning, then launches the background task
    /// that keeps refreshing until the shutdown signal fires.
    pub async fn start(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        self.refresh().await;

        let controller = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(controller.refresh_time);
            // The first tick of an interval completes immediately and the
            // initial scan already happened above.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!("stopping the topic map refresher");
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                // A shutdown arriving mid-scan drops the scan at its next
                // suspension point; the cache is only written by a scan that
                // ran to completion.
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!("stopping the topic map refresher");
                        break;
                    }
                    _ = controller.refresh() => {}
                }
            }
        })
    }

    async fn refresh(&self) {
        match self.scan().await {
            Ok(update) => self.cache.replace(update),
            Err(err) => warn!(error = err.to_string(), "skipping refresh tick"),
        }
    }

    async fn scan(&self) -> Result<HashMap<String, Vec<String>>, OpenFaaSError> {
        let mut builder = FunctionMapBuilder::new();

        let supported = match self.client.has_namespace_support().await {
            Ok(supported) => supported,
            Err(OpenFaaSError::Unauthenticated) => return Err(OpenFaaSError::Unauthenticated),
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    "unable to determine namespace support"
                );
                false
            }
        };

        let namespaces = if supported {
            match self.client.get_namespaces().await {
                Ok(namespaces) => namespaces,
                Err(OpenFaaSError::Unauthenticated) => {
                    return Err(OpenFaaSError::Unauthenticated)
                }
                Err(err) => {
                    warn!(
                        error = err.to_string(),
                        "unable to fetch namespaces, degrading to an empty namespace list"
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        if namespaces.is_empty() && !supported {
            self.collect(None, &mut builder).await?;
        } else {
            for namespace in &namespaces {
                self.collect(Some(namespace.as_str()), &mut builder).await?;
            }
        }

        Ok(builder.build())
    }

    /// Collects the topic annotations of one namespace into the builder.
    /// Fetch failures are logged and contribute nothing; 401 aborts the scan.
    async fn collect(
        &self,
        namespace: Option<&str>,
        builder: &mut FunctionMapBuilder,
    ) -> Result<(), OpenFaaSError> {
        let functions = match self.client.get_functions(namespace).await {
            Ok(functions) => functions,
            Err(OpenFaaSError::Unauthenticated) => return Err(OpenFaaSError::Unauthenticated),
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    namespace = namespace.unwrap_or("default"),
                    "failed to fetch functions"
                );
                return Ok(());
            }
        };

        for function in &functions {
            let Some(topics) = function
                .annotations
                .as_ref()
                .and_then(|annotations| annotations.get(TOPIC_ANNOTATION))
            else {
                continue;
            };

            for topic in topics.split(',') {
                builder.append(topic, &function.name);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl<C: FunctionCrawler + 'static> TopicInvoker for Controller<C> {
    async fn invoke(&self, topic: &str, invocation: &Invocation) -> Result<(), OpenFaaSError> {
        let functions = self.cache.lookup(topic);

        for function in &functions {
            match self.client.invoke_sync(function, invocation).await {
                Ok(response) => {
                    debug!(
                        function = function.as_str(),
                        response_bytes = response.len(),
                        "function invoked"
                    );
                }
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        function = function.as_str(),
                        "invocation failed"
                    );
                    return Err(err);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TopicFunctionCache;
    use crate::client::{FunctionFetcher, FunctionInvoker, FunctionStatus, NamespaceFetcher};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockCrawler {
        support: bool,
        probe_unauthorized: bool,
        namespaces: Vec<String>,
        namespaces_fail: bool,
        functions: HashMap<String, Vec<FunctionStatus>>,
        functions_fail: bool,
        fail_invocations: bool,
        scans: AtomicUsize,
        invoked: Mutex<Vec<String>>,
    }

    fn function(name: &str, topics: &str) -> FunctionStatus {
        let mut annotations = HashMap::new();
        annotations.insert(TOPIC_ANNOTATION.to_owned(), topics.to_owned());
        FunctionStatus {
            name: name.to_owned(),
            annotations: Some(annotations),
            namespace: None,
        }
    }

    #[async_trait]
    impl NamespaceFetcher for MockCrawler {
        async fn has_namespace_support(&self) -> Result<bool, OpenFaaSError> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            if self.probe_unauthorized {
                return Err(OpenFaaSError::Unauthenticated);
            }
            Ok(self.support)
        }

        async fn get_namespaces(&self) -> Result<Vec<String>, OpenFaaSError> {
            if self.namespaces_fail {
                return Err(OpenFaaSError::TransportFailure("boom".to_owned()));
            }
            Ok(self.namespaces.clone())
        }
    }

    #[async_trait]
    impl FunctionFetcher for MockCrawler {
        async fn get_functions(
            &self,
            namespace: Option<&str>,
        ) -> Result<Vec<FunctionStatus>, OpenFaaSError> {
            if self.functions_fail {
                return Err(OpenFaaSError::TransportFailure("boom".to_owned()));
            }
            Ok(self
                .functions
                .get(namespace.unwrap_or(""))
                .cloned()
                .unwrap_or_default())
        }
    }

    #[async_trait]
    impl FunctionInvoker for MockCrawler {
        async fn invoke_sync(
            &self,
            name: &str,
            _invocation: &Invocation,
        ) -> Result<Vec<u8>, OpenFaaSError> {
            self.invoked.lock().unwrap().push(name.to_owned());
            if self.fail_invocations {
                return Err(OpenFaaSError::UnexpectedStatus(500));
            }
            Ok(Vec::new())
        }

        async fn invoke_async(
            &self,
            _name: &str,
            _invocation: &Invocation,
        ) -> Result<(), OpenFaaSError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_initial_scan_with_namespaces() {
        let mut functions = HashMap::new();
        functions.insert(
            "faas".to_owned(),
            vec![
                function("biller", "billing,secret,transport"),
                function("secreter", "billing,secret,transport"),
            ],
        );
        functions.insert("special".to_owned(), Vec::new());
        functions.insert(
            "test".to_owned(),
            vec![function("transporter", "transport")],
        );

        let crawler = MockCrawler {
            support: true,
            namespaces: vec!["faas".to_owned(), "special".to_owned(), "test".to_owned()],
            functions,
            ..MockCrawler::default()
        };

        let cache = Arc::new(TopicFunctionCache::new());
        let controller = Controller::new(crawler, cache.clone(), Duration::from_secs(30));
        controller.refresh().await;

        assert_eq!(cache.lookup("billing").len(), 2);
        assert_eq!(cache.lookup("secret").len(), 2);
        assert_eq!(cache.lookup("transport").len(), 3);
        assert!(cache.lookup("unrelated").is_empty());
    }

    #[tokio::test]
    async fn test_initial_scan_without_namespace_support() {
        let mut functions = HashMap::new();
        functions.insert(
            "".to_owned(),
            vec![
                function("wrencher", "billing,secret,transport"),
                function("gizmo", "billing"),
            ],
        );

        let crawler = MockCrawler {
            support: false,
            functions,
            ..MockCrawler::default()
        };

        let cache = Arc::new(TopicFunctionCache::new());
        let controller = Controller::new(crawler, cache.clone(), Duration::from_secs(30));
        controller.refresh().await;

        assert_eq!(cache.lookup("billing").len(), 2);
        assert_eq!(cache.lookup("transport").len(), 1);
    }

    #[tokio::test]
    async fn test_namespace_enumeration_error_degrades_to_empty_map() {
        let crawler = MockCrawler {
            support: true,
            namespaces_fail: true,
            ..MockCrawler::default()
        };

        let cache = Arc::new(TopicFunctionCache::new());
        let mut stale = HashMap::new();
        stale.insert("billing".to_owned(), vec!["old".to_owned()]);
        cache.replace(stale);

        let controller = Controller::new(crawler, cache.clone(), Duration::from_secs(30));
        controller.refresh().await;

        // The scan completed with an empty namespace list, so the stale
        // entries were replaced by an empty map.
        assert!(cache.lookup("billing").is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_probe_skips_the_tick() {
        let crawler = MockCrawler {
            probe_unauthorized: true,
            ..MockCrawler::default()
        };

        let cache = Arc::new(TopicFunctionCache::new());
        let mut stale = HashMap::new();
        stale.insert("billing".to_owned(), vec!["old".to_owned()]);
        cache.replace(stale);

        let controller = Controller::new(crawler, cache.clone(), Duration::from_secs(30));
        controller.refresh().await;

        // Skipped tick: the stale-but-complete map stays in place.
        assert_eq!(cache.lookup("billing"), vec!["old".to_owned()]);
    }

    #[tokio::test]
    async fn test_function_fetch_error_contributes_nothing() {
        let crawler = MockCrawler {
            support: false,
            functions_fail: true,
            ..MockCrawler::default()
        };

        let cache = Arc::new(TopicFunctionCache::new());
        let mut stale = HashMap::new();
        stale.insert("billing".to_owned(), vec!["old".to_owned()]);
        cache.replace(stale);

        let controller = Controller::new(crawler, cache.clone(), Duration::from_secs(30));
        controller.refresh().await;

        assert!(cache.lookup("billing").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_ticks_on_the_configured_period() {
        let controller = Arc::new(Controller::new(
            MockCrawler::default(),
            Arc::new(TopicFunctionCache::new()) as Arc<dyn TopicMap>,
            Duration::from_secs(30),
        ));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = controller.clone().start(shutdown_rx).await;
        assert_eq!(controller.client.scans.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(70)).await;
        assert!(controller.client.scans.load(Ordering::SeqCst) >= 2);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_invoke_calls_every_function_for_the_topic() {
        let cache = Arc::new(TopicFunctionCache::new());
        let mut map = HashMap::new();
        map.insert(
            "billing".to_owned(),
            vec!["biller".to_owned(), "invoicer".to_owned()],
        );
        cache.replace(map);

        let controller = Controller::new(
            MockCrawler::default(),
            cache.clone() as Arc<dyn TopicMap>,
            Duration::from_secs(30),
        );

        controller
            .invoke("billing", &Invocation::default())
            .await
            .unwrap();

        assert_eq!(
            *controller.client.invoked.lock().unwrap(),
            vec!["biller".to_owned(), "invoicer".to_owned()]
        );
    }

    #[tokio::test]
    async fn test_invoke_aborts_on_first_error() {
        let cache = Arc::new(TopicFunctionCache::new());
        let mut map = HashMap::new();
        map.insert(
            "billing".to_owned(),
            vec!["biller".to_owned(), "invoicer".to_owned()],
        );
        cache.replace(map);

        let crawler = MockCrawler {
            fail_invocations: true,
            ..MockCrawler::default()
        };
        let controller = Controller::new(crawler, cache as Arc<dyn TopicMap>, Duration::from_secs(30));

        let result = controller.invoke("billing", &Invocation::default()).await;
        assert!(result.is_err());
        assert_eq!(controller.client.invoked.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_without_functions_is_a_noop() {
        let controller = Controller::new(
            MockCrawler::default(),
            Arc::new(TopicFunctionCache::new()) as Arc<dyn TopicMap>,
            Duration::from_secs(30),
        );

        controller
            .invoke("unknown", &Invocation::default())
            .await
            .unwrap();

        assert!(controller.client.invoked.lock().unwrap().is_empty());
    }
}
