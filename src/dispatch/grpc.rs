//! Typed RPC transport: gRPC `WriteLog` under a hard deadline.

use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Endpoint;
use tonic::{Code, Status};

use super::{Deliver, Submission};
use crate::error::DeliveryError;
use crate::persistence::grpc::{LogRequest, LogServiceClient};

/// Connects, calls `WriteLog` and drops the channel. The deadline covers the
/// connection setup and the call together; on expiry the in-flight work is
/// cancelled.
pub struct GrpcTransport {
    endpoint: String,
    timeout: Duration,
}

impl GrpcTransport {
    /// `endpoint` is a URI such as `http://logger-service:50001`.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    async fn write_log(&self, request: LogRequest) -> Result<String, DeliveryError> {
        let channel = Endpoint::from_shared(self.endpoint.clone())
            .map_err(|e| DeliveryError::connect(format!("{}: {e}", self.endpoint)))?
            .connect()
            .await
            .map_err(|e| DeliveryError::connect(format!("{}: {e}", self.endpoint)))?;

        let response = LogServiceClient::new(channel)
            .write_log(request)
            .await
            .map_err(status_error)?;
        Ok(response.into_inner().result)
    }
}

#[async_trait]
impl Deliver for GrpcTransport {
    async fn deliver(&self, submission: &Submission) -> Result<String, DeliveryError> {
        let request = LogRequest::from(&submission.event);
        match tokio::time::timeout(self.timeout, self.write_log(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DeliveryError::timeout(format!(
                "no answer from {} within {:?}",
                self.endpoint, self.timeout
            ))),
        }
    }
}

fn status_error(status: Status) -> DeliveryError {
    match status.code() {
        Code::DeadlineExceeded | Code::Cancelled => DeliveryError::timeout(status.message()),
        Code::Unavailable => DeliveryError::connect(status.message()),
        _ => DeliveryError::rejected(format!("{:?}: {}", status.code(), status.message())),
    }
}
