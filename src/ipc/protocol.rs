//! Wire messages exchanged over the bus socket.
//!
//! Method and signal names mirror the public interface: `ShowMenu`
//! returns an `i32` id (or [`SHOW_MENU_FAILED`]), and completed sessions
//! are announced with `OnSelect(id, item)` or `OnCancel(id)`.

use serde::{Deserialize, Serialize};

use crate::session::{Notification, Outcome};

/// The only synchronous failure value of `ShowMenu`.
pub const SHOW_MENU_FAILED: i32 = -1;

/// Client → server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Show a menu described by a serialized tree.
    ShowMenu { description: String },
}

/// Direct answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Positive session id, or [`SHOW_MENU_FAILED`].
    ShowMenu { id: i32 },
    /// The request frame could not be decoded. The server closes the
    /// connection after sending this.
    Error { message: String },
}

/// Asynchronous notification broadcast to every connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    OnSelect { id: i32, item: String },
    OnCancel { id: i32 },
}

impl Signal {
    /// Session id the signal belongs to.
    pub fn id(&self) -> i32 {
        match self {
            Self::OnSelect { id, .. } | Self::OnCancel { id } => *id,
        }
    }
}

impl From<Notification> for Signal {
    fn from(note: Notification) -> Self {
        let id = note.id.get();
        match note.outcome {
            Outcome::Selected(item) => Self::OnSelect { id, item },
            Outcome::Cancelled => Self::OnCancel { id },
        }
    }
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    Response(Response),
    Signal(Signal),
}
