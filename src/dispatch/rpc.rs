//! Binary RPC transport: one framed call per delivery.

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::{Deliver, Submission};
use crate::error::DeliveryError;
use crate::persistence::rpc::{
    read_frame, write_frame, RpcCall, RpcError, RpcPayload, RpcReply, LOG_INFO_METHOD,
};

/// Dials the persistence service, calls `RPCServer.LogInfo` and hangs up.
pub struct RpcTransport {
    address: String,
}

impl RpcTransport {
    /// `address` is `host:port`, e.g. `logger-service:5001`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Deliver for RpcTransport {
    async fn deliver(&self, submission: &Submission) -> Result<String, DeliveryError> {
        let mut stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| DeliveryError::connect(format!("dial {}: {e}", self.address)))?;

        let call = RpcCall {
            method: LOG_INFO_METHOD.to_string(),
            payload: RpcPayload::from(&submission.event),
        };
        write_frame(&mut stream, &call).await.map_err(call_error)?;
        let reply: RpcReply = read_frame(&mut stream).await.map_err(call_error)?;

        reply.result.map_err(DeliveryError::rejected)
    }
}

fn call_error(err: RpcError) -> DeliveryError {
    match err {
        RpcError::Io(_) => DeliveryError::connect(err),
        RpcError::Codec(_) | RpcError::FrameTooLarge(_) => DeliveryError::serialization(err),
    }
}
