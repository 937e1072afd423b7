//! HTTP transport used by [`DecisionClient`](crate::DecisionClient).
use std::{future::Future, time::Duration};

use reqwest::{StatusCode, Url};
use serde_json::Value;

use crate::{Error, Result};

/// A JSON POST request ready to be sent.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Target URL.
    pub url: Url,
    /// Request headers.
    pub headers: Vec<(&'static str, String)>,
    /// JSON body.
    pub body: Value,
    /// Timeout of the HTTP exchange.
    pub timeout: Duration,
}

/// Sends JSON requests and returns decoded JSON bodies.
///
/// Implementations must map non-success statuses to errors. The decision client bounds every
/// call with its own timeout on top of [`HttpRequest::timeout`].
pub trait Transport: Send + Sync {
    /// POST `request` and return the decoded JSON body.
    fn post_json(&self, request: HttpRequest) -> impl Future<Output = Result<Value>> + Send;
}

/// Default transport backed by [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with a default `reqwest` client.
    pub fn new() -> ReqwestTransport {
        ReqwestTransport::default()
    }

    /// Create a transport reusing `client`.
    pub fn with_client(client: reqwest::Client) -> ReqwestTransport {
        ReqwestTransport { client }
    }
}

impl Transport for ReqwestTransport {
    async fn post_json(&self, request: HttpRequest) -> Result<Value> {
        let mut builder = self.client.post(request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        let response = builder.json(&request.body).send().await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            log::warn!(target: "rollout", "client is not authorized. Check your API key");
            return Err(Error::Unauthorized);
        }
        if !status.is_success() {
            return Err(Error::Status(status.as_u16()));
        }

        Ok(response.json().await?)
    }
}
