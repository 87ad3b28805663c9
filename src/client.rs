// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenFaaS Gateway Client
//!
//! HTTP client for the OpenFaaS gateway. It invokes functions synchronously
//! (`POST /function/<name>`) and asynchronously (`POST /async-function/<name>`),
//! and crawls the installation for namespaces and deployed functions so the
//! refresher can rebuild the topic map.
//!
//! All requests carry a fixed user-agent and, when configured, a basic-auth
//! header built from the mounted gateway credentials.

use crate::config::{Config, Credentials};
use crate::errors::OpenFaaSError;
use async_trait::async_trait;
use reqwest::{header, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{error, warn};

/// User-agent sent with every gateway request
const USER_AGENT: &str = "OpenFaaS - Rabbit MQ Connector";

/// The payload and metadata of one function invocation, built from a single
/// delivery.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub topic: String,
    pub message: Option<Vec<u8>>,
    pub content_type: String,
    pub content_encoding: String,
}

/// Descriptor of a deployed function as returned by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionStatus {
    pub name: String,

    #[serde(default)]
    pub annotations: Option<HashMap<String, String>>,

    #[serde(default)]
    pub namespace: Option<String>,
}

/// Capability to invoke deployed OpenFaaS functions.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    /// Invokes a function synchronously, returning the response body.
    async fn invoke_sync(
        &self,
        name: &str,
        invocation: &Invocation,
    ) -> Result<Vec<u8>, OpenFaaSError>;

    /// Invokes a function asynchronously, returning once the gateway
    /// accepted the request.
    async fn invoke_async(&self, name: &str, invocation: &Invocation)
        -> Result<(), OpenFaaSError>;
}

/// Capability to explore the namespaces of an OpenFaaS installation.
#[async_trait]
pub trait NamespaceFetcher: Send + Sync {
    async fn has_namespace_support(&self) -> Result<bool, OpenFaaSError>;
    async fn get_namespaces(&self) -> Result<Vec<String>, OpenFaaSError>;
}

/// Capability to list the deployed functions of an OpenFaaS installation.
#[async_trait]
pub trait FunctionFetcher: Send + Sync {
    async fn get_functions(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<FunctionStatus>, OpenFaaSError>;
}

/// Everything the refresher and the dispatch path need from the gateway.
pub trait FunctionCrawler: NamespaceFetcher + FunctionFetcher + FunctionInvoker {}

impl<T: NamespaceFetcher + FunctionFetcher + FunctionInvoker> FunctionCrawler for T {}

/// Client used for interacting with OpenFaaS.
pub struct OpenFaaSClient {
    client: reqwest::Client,
    credentials: Option<Credentials>,
    url: String,
}

impl OpenFaaSClient {
    /// Creates a new gateway client from the connector configuration.
    ///
    /// The underlying HTTP client pools connections, applies the configured
    /// upstream timeout to every request, and optionally skips certificate
    /// verification.
    pub fn new(config: &Config) -> Result<OpenFaaSClient, OpenFaaSError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.max_clients_per_host)
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()
            .map_err(|err| OpenFaaSError::TransportFailure(err.to_string()))?;

        Ok(OpenFaaSClient {
            client,
            credentials: config.basic_auth.clone(),
            url: config.gateway_url.clone(),
        })
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(credentials) => {
                request.basic_auth(&credentials.user, Some(&credentials.password))
            }
            None => request,
        }
    }

    fn invocation_request(&self, url: &str, invocation: &Invocation) -> RequestBuilder {
        let mut request = self.with_auth(self.client.post(url));

        if !invocation.content_type.is_empty() {
            request = request.header(header::CONTENT_TYPE, &invocation.content_type);
        }
        if !invocation.content_encoding.is_empty() {
            request = request.header(header::CONTENT_ENCODING, &invocation.content_encoding);
        }

        request.body(invocation.message.clone().unwrap_or_default())
    }
}

#[async_trait]
impl FunctionInvoker for OpenFaaSClient {
    async fn invoke_sync(
        &self,
        name: &str,
        invocation: &Invocation,
    ) -> Result<Vec<u8>, OpenFaaSError> {
        let function_url = format!("{}/function/{}", self.url, name);

        let response = self
            .invocation_request(&function_url, invocation)
            .send()
            .await
            .map_err(|err| {
                error!(
                    error = err.to_string(),
                    function = name,
                    "unable to invoke function"
                );
                OpenFaaSError::TransportFailure(err.to_string())
            })?;

        match response.status() {
            StatusCode::OK => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|err| OpenFaaSError::TransportFailure(err.to_string()))?;
                Ok(body.to_vec())
            }
            StatusCode::UNAUTHORIZED => Err(OpenFaaSError::Unauthenticated),
            StatusCode::NOT_FOUND => Err(OpenFaaSError::NotDeployed(name.to_owned())),
            status => Err(OpenFaaSError::UnexpectedStatus(status.as_u16())),
        }
    }

    async fn invoke_async(
        &self,
        name: &str,
        invocation: &Invocation,
    ) -> Result<(), OpenFaaSError> {
        let function_url = format!("{}/async-function/{}", self.url, name);

        let response = self
            .invocation_request(&function_url, invocation)
            .send()
            .await
            .map_err(|err| {
                error!(
                    error = err.to_string(),
                    function = name,
                    "unable to invoke function"
                );
                OpenFaaSError::TransportFailure(err.to_string())
            })?;

        match response.status() {
            StatusCode::ACCEPTED => Ok(()),
            StatusCode::UNAUTHORIZED => Err(OpenFaaSError::Unauthenticated),
            StatusCode::NOT_FOUND => Err(OpenFaaSError::NotDeployed(name.to_owned())),
            status => Err(OpenFaaSError::UnexpectedStatus(status.as_u16())),
        }
    }
}

#[async_trait]
impl NamespaceFetcher for OpenFaaSClient {
    /// Probes whether this installation supports namespaces.
    ///
    /// An empty namespace array counts as "not supported": some editions of
    /// OpenFaaS answer the endpoint with `[]` even though they cannot scope
    /// functions by namespace.
    async fn has_namespace_support(&self) -> Result<bool, OpenFaaSError> {
        let url = format!("{}/system/namespaces", self.url);

        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|err| OpenFaaSError::TransportFailure(err.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let namespaces: Vec<String> = response.json().await.unwrap_or_default();
                Ok(!namespaces.is_empty())
            }
            StatusCode::UNAUTHORIZED => Err(OpenFaaSError::Unauthenticated),
            status => {
                warn!(
                    status = status.as_u16(),
                    "received unexpected status code while probing namespace support"
                );
                Ok(false)
            }
        }
    }

    async fn get_namespaces(&self) -> Result<Vec<String>, OpenFaaSError> {
        let url = format!("{}/system/namespaces", self.url);

        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|err| OpenFaaSError::TransportFailure(err.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await.unwrap_or_default()),
            StatusCode::UNAUTHORIZED => Err(OpenFaaSError::Unauthenticated),
            status => {
                warn!(
                    status = status.as_u16(),
                    "received unexpected status code while fetching namespaces"
                );
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl FunctionFetcher for OpenFaaSClient {
    async fn get_functions(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<FunctionStatus>, OpenFaaSError> {
        let url = format!("{}/system/functions", self.url);
        let mut request = self.with_auth(self.client.get(&url));

        if let Some(namespace) = namespace {
            request = request.query(&[("namespace", namespace)]);
        }

        let response = request
            .send()
            .await
            .map_err(|err| OpenFaaSError::TransportFailure(err.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await.unwrap_or_default()),
            StatusCode::UNAUTHORIZED => Err(OpenFaaSError::Unauthenticated),
            status => Err(OpenFaaSError::UnexpectedStatus(status.as_u16())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_status_deserialization() {
        let raw = r#"[
            {
                "name": "biller",
                "image": "docker:image",
                "annotations": {"topic": "billing,secret"},
                "namespace": "faas"
            },
            {
                "name": "bare"
            }
        ]"#;

        let functions: Vec<FunctionStatus> = serde_json::from_str(raw).unwrap();
        assert_eq!(functions.len(), 2);
        assert_eq!(functions[0].name, "biller");
        assert_eq!(
            functions[0]
                .annotations
                .as_ref()
                .unwrap()
                .get("topic")
                .unwrap(),
            "billing,secret"
        );
        assert_eq!(functions[1].name, "bare");
        assert!(functions[1].annotations.is_none());
        assert!(functions[1].namespace.is_none());
    }
}
