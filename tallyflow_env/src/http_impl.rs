//! Production transports over HTTP.
//!
//! The broker gateway accepts one JSON batch per POST; the aggregator exposes
//! the partial-result protocol on `/electionalternative`.

use crate::error::TransportError;
use crate::transport::{Aggregator, VoteSink};
use crate::types::{AggregationAck, AggregationSubmission, Batch};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

const AGGREGATION_PATH: &str = "electionalternative";

fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout.as_millis() as u64)
    } else if err.is_connect() {
        TransportError::unavailable(err.to_string())
    } else if err.is_decode() {
        TransportError::Serialization(err.to_string())
    } else {
        TransportError::delivery(err.to_string())
    }
}

async fn rejected(response: reqwest::Response) -> TransportError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    TransportError::Rejected { status, message }
}

fn build_client(timeout: Duration) -> Result<Client, TransportError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| TransportError::unavailable(format!("failed to build HTTP client: {}", e)))
}

/// Vote sink that publishes batches to an HTTP broker gateway.
///
/// Connections are pooled by `reqwest`; a dropped connection is re-established
/// transparently on the next send.
pub struct HttpSink {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpSink {
    /// Creates a sink posting to `endpoint` with a per-request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.into(),
            timeout,
        })
    }
    
    /// Returns the configured endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl VoteSink for HttpSink {
    async fn send(&self, batch: &Batch) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(batch)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;
        
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        
        debug!(batch_id = %batch.batch_id, events = batch.len(), "batch published");
        Ok(())
    }
    
    fn name(&self) -> &str {
        "http"
    }
}

/// Client for the external aggregator.
pub struct HttpAggregator {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpAggregator {
    /// Creates a client for the aggregator rooted at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: format!("{}/{}", base_url.trim_end_matches('/'), AGGREGATION_PATH),
            timeout,
        })
    }
    
    /// Returns the full aggregation URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Aggregator for HttpAggregator {
    async fn submit(
        &self,
        submission: &AggregationSubmission,
    ) -> Result<AggregationAck, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(submission)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;
        
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        
        response
            .json::<AggregationAck>()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))
    }
    
    async fn current(&self) -> Result<Option<AggregationSubmission>, TransportError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;
        
        // No run has reported yet
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        
        response
            .json::<AggregationSubmission>()
            .await
            .map(Some)
            .map_err(|e| map_reqwest_error(e, self.timeout))
    }
}
