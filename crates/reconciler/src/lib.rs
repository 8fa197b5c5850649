//! Status reconciler for the campus network tray
//!
//! Keeps one `AccountState` current by polling two unreliable sources:
//! the lightweight connection probe (who is online on this link) and the
//! authoritative account probe (usage, balance, sessions). Results are merged
//! into the state, presenters are notified after every change, and the
//! auto-manage policy decides whether to log in automatically.
//!
//! Lifecycle:
//! 1. `Reconciler::new` starts at `Unknown` with nothing known
//! 2. `spawn_scheduler` runs both refresh cycles on their own timers
//! 3. Completed status refresh that finds the link offline -> automatic login
//!    (when enabled) -> immediate full refresh
//! 4. User commands (login, logout, session logout, refresh) go through the
//!    same queue and end in a full refresh
//! 5. Probe failures degrade to `Error` (status) or stale figures (info)

pub mod error;
pub mod format;
pub mod menu;
pub mod policy;
pub mod presenter;
pub mod reconciler;
pub mod scheduler;
pub mod state;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
pub use menu::{MenuAction, MenuEntry, build_menu, render_text};
pub use policy::{PolicyConfig, should_auto_login};
pub use presenter::{Presenter, WatchPresenter};
pub use reconciler::{LoginTrigger, Reconciler, RefreshCause, RefreshOutcome};
pub use scheduler::{Command, Intervals, SchedulerHandle, spawn_scheduler};
pub use state::{AccountState, CurrentSession, Status, StatusReport};
