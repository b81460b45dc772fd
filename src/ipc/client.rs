//! Bus client — used by `piemenud show`.

use std::path::{Path, PathBuf};

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use super::codec::{ClientCodec, CodecError};
use super::protocol::{Request, Response, ServerMessage, Signal};

/// Client-side failure.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("server closed the connection")]
    Closed,
    #[error("server refused the request: {0}")]
    Refused(String),
}

/// One connection to the bus socket.
pub struct BusClient {
    framed: Framed<UnixStream, ClientCodec>,
}

impl BusClient {
    pub async fn connect(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| ClientError::Connect {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            framed: Framed::new(stream, ClientCodec::default()),
        })
    }

    /// Call `ShowMenu`; returns the raw id (`-1` on failure).
    ///
    /// Signals for other sessions that arrive before the reply are skipped.
    pub async fn show_menu(&mut self, description: String) -> Result<i32, ClientError> {
        self.framed.send(Request::ShowMenu { description }).await?;
        loop {
            match self.next().await? {
                ServerMessage::Response(Response::ShowMenu { id }) => return Ok(id),
                ServerMessage::Response(Response::Error { message }) => {
                    return Err(ClientError::Refused(message));
                }
                ServerMessage::Signal(signal) => {
                    tracing::debug!(id = signal.id(), "skipping signal for another session");
                }
            }
        }
    }

    /// Wait for the `OnSelect` / `OnCancel` signal of session `id`.
    pub async fn wait_for(&mut self, id: i32) -> Result<Signal, ClientError> {
        loop {
            match self.next().await? {
                ServerMessage::Signal(signal) if signal.id() == id => return Ok(signal),
                other => tracing::debug!(message = ?other, "skipping unrelated message"),
            }
        }
    }

    async fn next(&mut self) -> Result<ServerMessage, ClientError> {
        Ok(self.framed.next().await.ok_or(ClientError::Closed)??)
    }
}
