//! Bus server — accepts client connections and serves `ShowMenu`.
//!
//! [`BusEndpoint`] is the marshalling boundary: it parses descriptions,
//! delegates to the [`SessionMachine`], and collapses every failure
//! (bad input, empty menu, busy) into [`SHOW_MENU_FAILED`].
//! [`Server`] owns the listening socket and runs one task per connection;
//! every connection receives every signal.

use std::future::Future;
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::PathBuf;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::codec::Framed;

use super::codec::ServerCodec;
use super::protocol::{Request, Response, SHOW_MENU_FAILED, ServerMessage, Signal};
use crate::config::ServerConfig;
use crate::menu;
use crate::session::{Notification, SessionMachine};

/// Socket file permissions (owner only).
const SOCKET_MODE: u32 = 0o600;

/// Socket directory permissions (owner only).
const DIRECTORY_MODE: u32 = 0o700;

/// Server startup failure.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to prepare socket directory {path}: {source}")]
    Directory { path: PathBuf, source: io::Error },
    #[error("failed to bind {path}: {source}")]
    Bind { path: PathBuf, source: io::Error },
}

/// `ShowMenu` entry point, independent of the transport.
pub struct BusEndpoint {
    machine: Arc<SessionMachine>,
}

impl BusEndpoint {
    pub fn new(machine: Arc<SessionMachine>) -> Self {
        Self { machine }
    }

    /// Start a session for `description`.
    ///
    /// Returns the positive session id, or [`SHOW_MENU_FAILED`] if the
    /// description is malformed, the menu is empty, or a session is
    /// already active. The cause is only visible in the log.
    pub fn show_menu(&self, description: &str) -> i32 {
        let menu = match menu::parse(description) {
            Ok(menu) => menu,
            Err(e) => {
                tracing::warn!(error = %e, "ShowMenu rejected");
                return SHOW_MENU_FAILED;
            }
        };
        menu.log_outline();

        match self.machine.begin(menu) {
            Ok(id) => id.get(),
            Err(e) => {
                tracing::warn!(error = %e, "ShowMenu rejected");
                SHOW_MENU_FAILED
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.machine.subscribe()
    }
}

/// Removes the socket file when the server goes away.
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            tracing::debug!(path = %self.0.display(), error = %e, "socket cleanup failed");
        }
    }
}

/// Listening bus socket.
pub struct Server {
    listener: UnixListener,
    endpoint: Arc<BusEndpoint>,
    permits: Arc<Semaphore>,
    // Only held so the socket file is removed on drop.
    _socket: SocketFile,
}

impl Server {
    /// Bind the socket described by `config`.
    ///
    /// Creates the parent directory (mode 0700) if needed and replaces a
    /// stale socket file. Must be called from within a tokio runtime.
    pub fn bind(config: &ServerConfig, endpoint: BusEndpoint) -> Result<Self, ServerError> {
        let path = config.socket_path.clone();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(DIRECTORY_MODE)
                .create(parent)
                .map_err(|source| ServerError::Directory {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(ServerError::Bind { path, source }),
        }

        let listener = UnixListener::bind(&path).map_err(|source| ServerError::Bind {
            path: path.clone(),
            source,
        })?;
        let socket = SocketFile(path);

        std::fs::set_permissions(&socket.0, std::fs::Permissions::from_mode(SOCKET_MODE))
            .map_err(|source| ServerError::Bind {
                path: socket.0.clone(),
                source,
            })?;

        tracing::info!(path = %socket.0.display(), "bus socket listening");

        Ok(Self {
            listener,
            endpoint: Arc::new(endpoint),
            permits: Arc::new(Semaphore::new(config.max_connections)),
            _socket: socket,
        })
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => {
                    let stream = match accepted {
                        Ok((stream, _)) => stream,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                        tracing::warn!("connection limit reached; dropping client");
                        continue;
                    };
                    let endpoint = Arc::clone(&self.endpoint);
                    tokio::spawn(async move {
                        serve_connection(&endpoint, stream).await;
                        drop(permit);
                    });
                }
            }
        }

        match self.endpoint.machine.active() {
            Some(id) => tracing::info!(id = %id, "shutting down with a menu still shown"),
            None => tracing::info!("shutting down"),
        }
    }
}

async fn serve_connection(endpoint: &BusEndpoint, stream: UnixStream) {
    let mut signals = endpoint.subscribe();
    let mut framed = Framed::new(stream, ServerCodec::default());
    tracing::debug!("client connected");

    // Requests are answered before the next signal is forwarded, so a
    // client always sees its ShowMenu reply before the matching signal.
    loop {
        tokio::select! {
            frame = framed.next() => match frame {
                None => break,
                Some(Ok(Request::ShowMenu { description })) => {
                    let id = endpoint.show_menu(&description);
                    let reply = ServerMessage::Response(Response::ShowMenu { id });
                    if let Err(e) = framed.send(reply).await {
                        tracing::debug!(error = %e, "failed to send reply");
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "dropping client after bad frame");
                    let reply = ServerMessage::Response(Response::Error { message: e.to_string() });
                    if let Err(e) = framed.send(reply).await {
                        tracing::debug!(error = %e, "failed to send error reply");
                    }
                    break;
                }
            },
            note = signals.recv() => match note {
                Ok(note) => {
                    if let Err(e) = framed.send(ServerMessage::Signal(Signal::from(note))).await {
                        tracing::debug!(error = %e, "failed to send signal");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "client fell behind; signals dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    tracing::debug!("client disconnected");
}
