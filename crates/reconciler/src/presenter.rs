//! Presentation seam
//!
//! The reconciler calls `Presenter::render` once at the end of every refresh
//! handler, while still holding the state lock, so presenters see updates in
//! the order they were applied. Implementations must return quickly.

use tokio::sync::watch;

use crate::state::AccountState;

/// Read-only consumer of account state snapshots.
pub trait Presenter: Send + Sync {
    fn render(&self, state: &AccountState);
}

/// Publishes snapshots on a `watch` channel. Never blocks; a slow reader
/// only ever sees the latest state.
pub struct WatchPresenter {
    tx: watch::Sender<AccountState>,
}

impl WatchPresenter {
    pub fn new() -> (Self, watch::Receiver<AccountState>) {
        let (tx, rx) = watch::channel(AccountState::new());
        (Self { tx }, rx)
    }
}

impl Presenter for WatchPresenter {
    fn render(&self, state: &AccountState) {
        // send_replace succeeds even with no receivers left
        self.tx.send_replace(state.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Status;

    #[tokio::test]
    async fn watch_presenter_publishes_latest_snapshot() {
        let (presenter, mut rx) = WatchPresenter::new();
        assert_eq!(rx.borrow().status, Status::Unknown);

        let mut state = AccountState::new();
        state.status = Status::Offline;
        presenter.render(&state);
        state.status = Status::Online;
        presenter.render(&state);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, Status::Online);
    }

    #[test]
    fn render_without_receivers_does_not_panic() {
        let (presenter, rx) = WatchPresenter::new();
        drop(rx);
        presenter.render(&AccountState::new());
    }
}
