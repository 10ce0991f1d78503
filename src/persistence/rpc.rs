//! Binary RPC front end of the persistence service.
//!
//! A minimal call/reply protocol over TCP. Every frame is a big-endian `u32`
//! length followed by a bitcode-encoded body. The client sends an
//! [`RpcCall`] naming a method and the server answers with an [`RpcReply`]
//! carrying a free-text result or an error string.

use std::io;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use super::{LogEntry, LogStore};
use crate::event::Event;

/// The only method the persistence service exposes.
pub const LOG_INFO_METHOD: &str = "RPCServer.LogInfo";

/// Largest frame either side accepts.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcPayload {
    pub name: String,
    pub data: String,
}

impl From<&Event> for RpcPayload {
    fn from(event: &Event) -> Self {
        Self {
            name: event.name.clone(),
            data: event.data.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcCall {
    pub method: String,
    pub payload: RpcPayload,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcReply {
    pub result: Result<String, String>,
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc io error: {0}")]
    Io(#[from] io::Error),
    #[error("rpc codec error: {0}")]
    Codec(String),
    #[error("rpc frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
}

impl RpcError {
    /// The peer hung up between frames.
    pub fn is_eof(&self) -> bool {
        matches!(self, RpcError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Encode `value` and write it as one frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = bitcode::serialize(value).map_err(|e| RpcError::Codec(e.to_string()))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(RpcError::FrameTooLarge(body.len()));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and decode it.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, RpcError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(RpcError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    bitcode::deserialize(&body).map_err(|e| RpcError::Codec(e.to_string()))
}

fn handle_call(store: &dyn LogStore, call: RpcCall) -> RpcReply {
    if call.method != LOG_INFO_METHOD {
        return RpcReply {
            result: Err(format!("rpc: can't find method {}", call.method)),
        };
    }
    let name = call.payload.name.clone();
    let entry = LogEntry::from_event(Event::new(call.payload.name, call.payload.data));
    match store.insert(entry) {
        Ok(()) => RpcReply {
            result: Ok(format!("processed payload via RPC: {name}")),
        },
        Err(e) => {
            error!(error = %e, "insert failed");
            RpcReply {
                result: Err(e.to_string()),
            }
        }
    }
}

async fn handle_connection(store: Arc<dyn LogStore>, mut stream: TcpStream) -> Result<(), RpcError> {
    loop {
        let call: RpcCall = match read_frame(&mut stream).await {
            Ok(call) => call,
            Err(e) if e.is_eof() => return Ok(()),
            Err(e) => return Err(e),
        };
        debug!(method = %call.method, "rpc call");
        let reply = handle_call(store.as_ref(), call);
        write_frame(&mut stream, &reply).await?;
    }
}

/// Accept connections on `listener` until the task is dropped.
pub async fn serve_listener(store: Arc<dyn LogStore>, listener: TcpListener) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(store, stream).await {
                warn!(%peer, error = %e, "rpc connection failed");
            }
        });
    }
}

/// Bind `addr` (e.g. `"0.0.0.0:5001"`) and serve the RPC front end.
pub async fn serve(store: Arc<dyn LogStore>, addr: &str) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "rpc server listening");
    serve_listener(store, listener).await
}
