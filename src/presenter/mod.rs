//! Presenter trait — shows a menu and reports the user's choice.
//!
//! The session machine calls [`Presenter::display`] once per session and
//! awaits the [`Reply`] it handed over. A reply is resolved at most once
//! because resolving consumes it; dropping it unresolved counts as a
//! cancellation.

mod command;

pub use command::CommandPresenter;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::menu::MenuNode;
use crate::session::Outcome;

/// Presentation failure. Never leaves the presenter: it is logged and
/// the session resolves as cancelled.
#[derive(Debug, Error)]
pub enum PresenterError {
    /// The picker process could not be started.
    #[error("failed to start picker {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// The picker process could not be waited on.
    #[error("picker I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Single-use handle for reporting a session's outcome.
#[derive(Debug)]
pub struct Reply {
    tx: oneshot::Sender<Outcome>,
}

impl Reply {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Report that the user activated the leaf identified by `item`.
    pub fn select(self, item: impl Into<String>) {
        self.resolve(Outcome::Selected(item.into()));
    }

    /// Report that the user dismissed the menu.
    pub fn cancel(self) {
        self.resolve(Outcome::Cancelled);
    }

    fn resolve(self, outcome: Outcome) {
        // The receiver only goes away when the runtime shuts down.
        if self.tx.send(outcome).is_err() {
            tracing::debug!("session receiver gone before outcome was reported");
        }
    }
}

/// Displays menus to the user.
///
/// Implementations must return from `display` without waiting for the
/// user, and must eventually resolve or drop the reply. Internal failures
/// resolve as a cancellation.
pub trait Presenter: Send + Sync {
    fn display(&self, menu: Arc<MenuNode>, reply: Reply);
}
