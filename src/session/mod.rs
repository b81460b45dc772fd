//! Session state machine — single-flight menu sessions with id correlation.
//!
//! At most one session is active at a time. [`SessionMachine::begin`]
//! allocates the next correlation id, hands the menu to the
//! [`Presenter`] and returns immediately. The presenter's [`Reply`] is
//! awaited on a spawned task, which completes the session and publishes
//! a [`Notification`] to every subscriber.
//!
//! The `(active, last_id)` pair lives behind one mutex. Completion clears
//! the active session before the notification is published, so a
//! subscriber that reacts by starting a new session always gets a fresh id.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::broadcast;

use crate::menu::MenuNode;
use crate::presenter::{Presenter, Reply};

/// Capacity of the notification channel. Slow subscribers past this
/// point observe a lag and skip ahead.
const NOTIFICATION_CAPACITY: usize = 64;

/// Correlation id of a session. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(i32);

impl SessionId {
    pub fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Terminal result of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The user activated a leaf; carries the item identifier.
    Selected(String),
    /// The user dismissed the menu, or presentation failed.
    Cancelled,
}

/// An outcome tagged with the session it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: SessionId,
    pub outcome: Outcome,
}

/// Why a session could not be started.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Another session is still waiting for the user.
    #[error("session {active} is already active")]
    Busy { active: SessionId },
    /// The menu has nothing to select.
    #[error("menu {name:?} has no items")]
    RejectedMenu { name: String },
    /// All positive `i32` ids have been handed out.
    #[error("session ids exhausted")]
    Exhausted,
}

struct Active {
    id: SessionId,
    // Held for the lifetime of the session; released on completion.
    _menu: Arc<MenuNode>,
}

#[derive(Default)]
struct State {
    active: Option<Active>,
    /// Last allocated id; 0 means none yet.
    last_id: i32,
}

/// Owner of the single in-flight session.
pub struct SessionMachine {
    state: Mutex<State>,
    presenter: Arc<dyn Presenter>,
    notifications: broadcast::Sender<Notification>,
}

impl SessionMachine {
    pub fn new(presenter: Arc<dyn Presenter>) -> Arc<Self> {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Arc::new(Self {
            state: Mutex::new(State::default()),
            presenter,
            notifications,
        })
    }

    /// Receive every notification published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Id of the active session, if any.
    pub fn active(&self) -> Option<SessionId> {
        self.lock().active.as_ref().map(|a| a.id)
    }

    /// Start a session for `menu`.
    ///
    /// Fails without side effects if a session is already active, if the
    /// menu has no items, or if the id space is exhausted. Must be called
    /// from within a tokio runtime; the outcome is awaited on a spawned
    /// task and never blocks the caller.
    pub fn begin(self: &Arc<Self>, menu: MenuNode) -> Result<SessionId, SessionError> {
        let menu = Arc::new(menu);
        let id = {
            let mut state = self.lock();
            if let Some(active) = &state.active {
                return Err(SessionError::Busy { active: active.id });
            }
            if menu.is_leaf() {
                return Err(SessionError::RejectedMenu {
                    name: menu.name().to_owned(),
                });
            }
            let next = state
                .last_id
                .checked_add(1)
                .ok_or(SessionError::Exhausted)?;
            let id = SessionId(next);
            state.last_id = next;
            state.active = Some(Active {
                id,
                _menu: Arc::clone(&menu),
            });
            id
        };

        tracing::info!(id = %id, menu = menu.name(), leaves = menu.leaf_count(), "session started");

        let (reply, outcome) = Reply::channel();
        let machine = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = outcome.await.unwrap_or_else(|_| {
                tracing::warn!(id = %id, "presenter dropped the session; cancelling");
                Outcome::Cancelled
            });
            machine.complete(id, outcome);
        });
        self.presenter.display(menu, reply);

        Ok(id)
    }

    /// Finish session `id` with `outcome` and publish the notification.
    ///
    /// Returns `false` without publishing anything if `id` is not the
    /// active session (already completed, or never started).
    pub fn complete(&self, id: SessionId, outcome: Outcome) -> bool {
        {
            let mut state = self.lock();
            if state.active.as_ref().map(|a| a.id) != Some(id) {
                tracing::debug!(id = %id, "ignoring completion for inactive session");
                return false;
            }
            state.active = None;
        }

        match &outcome {
            Outcome::Selected(item) => tracing::info!(id = %id, item, "session selected"),
            Outcome::Cancelled => tracing::info!(id = %id, "session cancelled"),
        }

        if self.notifications.send(Notification { id, outcome }).is_err() {
            tracing::debug!(id = %id, "no subscribers for notification");
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // State is updated in single assignments; a poisoned guard is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::menu::{self, MenuNode};
    use std::time::Duration;

    /// Presenter that parks every reply until the test plays the user.
    #[derive(Default)]
    pub(crate) struct ManualPresenter {
        shown: Mutex<Vec<(Arc<MenuNode>, Reply)>>,
    }

    impl ManualPresenter {
        pub(crate) fn shown(&self) -> usize {
            self.shown.lock().unwrap().len()
        }

        pub(crate) fn take_latest(&self) -> (Arc<MenuNode>, Reply) {
            self.shown.lock().unwrap().pop().expect("nothing displayed")
        }
    }

    impl Presenter for ManualPresenter {
        fn display(&self, menu: Arc<MenuNode>, reply: Reply) {
            self.shown.lock().unwrap().push((menu, reply));
        }
    }

    /// Presenter that fails immediately by dropping its reply.
    struct BrokenPresenter;

    impl Presenter for BrokenPresenter {
        fn display(&self, _menu: Arc<MenuNode>, reply: Reply) {
            drop(reply);
        }
    }

    pub(crate) fn root_menu() -> MenuNode {
        menu::parse(r#"{"name":"Root","icon":"folder","items":[{"name":"A","icon":"a"},{"name":"B","icon":"b"}]}"#)
            .unwrap()
    }

    async fn next(rx: &mut broadcast::Receiver<Notification>) -> Notification {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for notification")
            .unwrap()
    }

    fn manual() -> (Arc<ManualPresenter>, Arc<SessionMachine>) {
        let presenter = Arc::new(ManualPresenter::default());
        let machine = SessionMachine::new(presenter.clone());
        (presenter, machine)
    }

    #[tokio::test]
    async fn select_reports_id_then_next_session_gets_next_id() {
        let (presenter, machine) = manual();
        let mut rx = machine.subscribe();

        let id = machine.begin(root_menu()).unwrap();
        assert_eq!(id.get(), 1);
        assert_eq!(machine.active(), Some(id));

        let (shown, reply) = presenter.take_latest();
        assert_eq!(shown.name(), "Root");
        reply.select("A");

        let note = next(&mut rx).await;
        assert_eq!(
            note,
            Notification {
                id,
                outcome: Outcome::Selected("A".into())
            }
        );
        assert_eq!(machine.active(), None);
        assert_eq!(machine.begin(root_menu()).unwrap().get(), 2);
    }

    #[tokio::test]
    async fn busy_has_no_side_effects() {
        let (presenter, machine) = manual();
        let first = machine.begin(root_menu()).unwrap();

        let err = machine.begin(root_menu()).unwrap_err();
        assert_eq!(err, SessionError::Busy { active: first });
        assert_eq!(presenter.shown(), 1);
        assert_eq!(machine.active(), Some(first));

        let mut rx = machine.subscribe();
        presenter.take_latest().1.cancel();
        assert_eq!(next(&mut rx).await.id, first);
        assert_eq!(machine.begin(root_menu()).unwrap().get(), 2);
    }

    #[tokio::test]
    async fn empty_menu_is_rejected_and_stays_idle() {
        let (presenter, machine) = manual();
        let empty = menu::parse(r#"{"name":"Empty","icon":"x","items":[]}"#).unwrap();

        assert!(matches!(
            machine.begin(empty),
            Err(SessionError::RejectedMenu { .. })
        ));
        assert_eq!(machine.active(), None);
        assert_eq!(presenter.shown(), 0);
        assert_eq!(machine.begin(root_menu()).unwrap().get(), 1);
    }

    #[tokio::test]
    async fn duplicate_completion_is_ignored() {
        let (presenter, machine) = manual();
        let mut rx = machine.subscribe();
        let id = machine.begin(root_menu()).unwrap();
        presenter.take_latest().1.cancel();
        assert_eq!(next(&mut rx).await.outcome, Outcome::Cancelled);

        assert!(!machine.complete(id, Outcome::Selected("A".into())));
        assert!(!machine.complete(id, Outcome::Cancelled));
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert_eq!(machine.begin(root_menu()).unwrap().get(), 2);
    }

    #[tokio::test]
    async fn stale_completion_does_not_touch_new_session() {
        let (_presenter, machine) = manual();
        let first = machine.begin(root_menu()).unwrap();
        assert!(machine.complete(first, Outcome::Cancelled));

        let second = machine.begin(root_menu()).unwrap();
        assert!(!machine.complete(first, Outcome::Cancelled));
        assert_eq!(machine.active(), Some(second));
    }

    #[tokio::test]
    async fn presentation_failure_resolves_as_cancel() {
        let machine = SessionMachine::new(Arc::new(BrokenPresenter));
        let mut rx = machine.subscribe();

        let id = machine.begin(root_menu()).unwrap();
        let note = next(&mut rx).await;
        assert_eq!(note.id, id);
        assert_eq!(note.outcome, Outcome::Cancelled);
        assert_eq!(machine.active(), None);
    }

    #[tokio::test]
    async fn ids_strictly_increase_across_sessions() {
        let (presenter, machine) = manual();
        let mut rx = machine.subscribe();
        let mut ids = Vec::new();

        for round in 0..5 {
            let id = machine.begin(root_menu()).unwrap();
            ids.push(id.get());
            let reply = presenter.take_latest().1;
            if round % 2 == 0 {
                reply.select("B");
            } else {
                reply.cancel();
            }
            assert_eq!(next(&mut rx).await.id, id);
        }

        assert_eq!(ids, [1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn state_is_idle_when_notification_arrives() {
        let (presenter, machine) = manual();
        let mut rx = machine.subscribe();
        let first = machine.begin(root_menu()).unwrap();
        presenter.take_latest().1.select("A");

        let note = next(&mut rx).await;
        assert_eq!(note.id, first);
        // A client reacting to the notification can start over immediately.
        let second = machine.begin(root_menu()).unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn exhausted_id_space_is_reported() {
        let (_presenter, machine) = manual();
        machine.lock().last_id = i32::MAX;
        assert_eq!(
            machine.begin(root_menu()).unwrap_err(),
            SessionError::Exhausted
        );
        assert_eq!(machine.active(), None);
    }
}
