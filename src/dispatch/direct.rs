//! Direct transport: JSON over HTTP to the persistence service.

use async_trait::async_trait;
use reqwest::header::{CONNECTION, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::debug;

use super::{Deliver, Submission};
use crate::error::DeliveryError;

/// `POST`s the event to the persistence service and waits for `202 Accepted`.
///
/// Every call asks for `Connection: close`, so no socket outlives the
/// delivery in the client's idle pool.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// `endpoint` is the full URL of the write route, e.g.
    /// `http://logger-service/log`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Deliver for HttpTransport {
    async fn deliver(&self, submission: &Submission) -> Result<String, DeliveryError> {
        let body = submission.event.to_wire()?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(CONNECTION, "close")
            .body(body)
            .send()
            .await
            .map_err(|e| DeliveryError::connect(format!("POST {}: {e}", self.endpoint)))?;

        let status = response.status();
        debug!(%status, "persistence service answered");
        if status != StatusCode::ACCEPTED {
            return Err(DeliveryError::rejected(format!(
                "persistence service returned {status}"
            )));
        }
        Ok("logged".to_string())
    }
}
