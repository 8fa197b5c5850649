//! Refresh scheduler
//!
//! Drives the reconciler from two independent timers and a command channel.
//! Everything that happens is an `Event` on one queue; the pure
//! `handle_event` function turns each event into `Action`s, and the driver
//! executes those actions as spawned tasks that post completion events back
//! onto the queue. Refresh handlers therefore never call the policy or each
//! other directly:
//!
//! - timer tick            -> refresh (status or info)
//! - status refresh done   -> policy check -> maybe automatic login
//! - login/logout finished -> full refresh (status + info)
//!
//! Timers keep firing while probe calls are outstanding; the reconciler's
//! single-flight guards drop overlapping refreshes of the same kind.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::policy::{PolicyConfig, should_auto_login};
use crate::reconciler::{LoginTrigger, Reconciler, RefreshCause, RefreshOutcome};
use crate::state::AccountState;

/// User requests coming from the tray (or the console standing in for it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login,
    Logout,
    Refresh,
    LogoutSession(String),
    SetAutoManage(bool),
    Shutdown,
}

/// Remote action whose completion triggers a follow-up refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finished {
    Login(LoginTrigger),
    Logout,
    LogoutSession(String),
}

/// Everything the driver reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StatusTick,
    InfoTick,
    Command(Command),
    StatusRefreshed {
        cause: RefreshCause,
        outcome: RefreshOutcome,
    },
    ActionFinished {
        action: Finished,
        ok: bool,
    },
}

/// Work the driver performs in response to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    RefreshStatus(RefreshCause),
    RefreshInfo,
    Login(LoginTrigger),
    Logout,
    LogoutSession(String),
    SetAutoManage(bool),
    Stop,
}

/// Driver bookkeeping carried between events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Running {
        /// An automatic login has been issued and not yet finished
        auto_login_in_flight: bool,
    },
    Stopped,
}

impl DriverState {
    pub fn initial() -> Self {
        DriverState::Running {
            auto_login_in_flight: false,
        }
    }
}

fn full_refresh(cause: RefreshCause) -> Vec<Action> {
    vec![Action::RefreshStatus(cause), Action::RefreshInfo]
}

/// Handle one event. Pure function: no I/O.
///
/// `account` is the state as of event handling; the policy reads it only for
/// completed status refreshes.
pub fn handle_event(
    driver: DriverState,
    event: Event,
    account: &AccountState,
    policy: &PolicyConfig,
) -> (DriverState, Vec<Action>) {
    let DriverState::Running {
        auto_login_in_flight,
    } = driver
    else {
        return (driver, Vec::new());
    };

    match event {
        Event::StatusTick => (driver, vec![Action::RefreshStatus(RefreshCause::Timer)]),
        Event::InfoTick => (driver, vec![Action::RefreshInfo]),

        // --- Policy check after a completed status refresh ---
        Event::StatusRefreshed {
            cause,
            outcome: RefreshOutcome::Succeeded | RefreshOutcome::Failed,
        } if cause != RefreshCause::AutoLoginFollowUp
            && !auto_login_in_flight
            && should_auto_login(account, policy) =>
        {
            (
                DriverState::Running {
                    auto_login_in_flight: true,
                },
                vec![Action::Login(LoginTrigger::Auto)],
            )
        }
        Event::StatusRefreshed { .. } => (driver, Vec::new()),

        // --- Remote actions finished: show the outcome right away ---
        Event::ActionFinished {
            action: Finished::Login(LoginTrigger::Auto),
            ..
        } => (
            DriverState::Running {
                auto_login_in_flight: false,
            },
            full_refresh(RefreshCause::AutoLoginFollowUp),
        ),
        Event::ActionFinished { .. } => (driver, full_refresh(RefreshCause::FollowUp)),

        // --- User commands ---
        Event::Command(Command::Refresh) => (driver, full_refresh(RefreshCause::User)),
        Event::Command(Command::Login) => (driver, vec![Action::Login(LoginTrigger::User)]),
        Event::Command(Command::Logout) => (driver, vec![Action::Logout]),
        Event::Command(Command::LogoutSession(id)) => (driver, vec![Action::LogoutSession(id)]),
        Event::Command(Command::SetAutoManage(enabled)) => {
            (driver, vec![Action::SetAutoManage(enabled)])
        }
        Event::Command(Command::Shutdown) => (DriverState::Stopped, vec![Action::Stop]),
    }
}

/// Refresh intervals for the two cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub status: Duration,
    pub info: Duration,
}

/// Cloneable handle for sending commands to a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::SchedulerStopped)
    }
}

/// Spawn the scheduler loop. The first tick of each timer fires immediately,
/// so the tray has real data right after startup.
///
/// The loop ends on `Command::Shutdown` or when every `SchedulerHandle` has
/// been dropped; outstanding probe calls are aborted.
pub fn spawn_scheduler(
    reconciler: Arc<Reconciler>,
    intervals: Intervals,
) -> (SchedulerHandle, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::channel(32);
    let task = tokio::spawn(run(reconciler, intervals, commands_rx));
    (
        SchedulerHandle {
            commands: commands_tx,
        },
        task,
    )
}

async fn run(
    reconciler: Arc<Reconciler>,
    intervals: Intervals,
    mut commands: mpsc::Receiver<Command>,
) {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<Event>();
    let mut tasks = JoinSet::new();

    let mut status_ticker = tokio::time::interval(intervals.status);
    status_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut info_ticker = tokio::time::interval(intervals.info);
    info_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut driver = DriverState::initial();
    info!(
        status_interval_ms = intervals.status.as_millis() as u64,
        info_interval_ms = intervals.info.as_millis() as u64,
        "scheduler started"
    );

    loop {
        let event = tokio::select! {
            _ = status_ticker.tick() => Event::StatusTick,
            _ = info_ticker.tick() => Event::InfoTick,
            command = commands.recv() => Event::Command(command.unwrap_or(Command::Shutdown)),
            Some(event) = events_rx.recv() => event,
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!(error = %e, "scheduler task panicked");
                    }
                }
                continue;
            }
        };

        debug!(?event, "scheduler event");
        let account = reconciler.snapshot().await;
        let (next, actions) = handle_event(driver, event, &account, &reconciler.policy_config());
        driver = next;

        for action in actions {
            if action == Action::Stop {
                tasks.abort_all();
                info!("scheduler stopped");
                return;
            }
            execute(action, &reconciler, &events_tx, &mut tasks);
        }
    }
}

fn execute(
    action: Action,
    reconciler: &Arc<Reconciler>,
    events: &mpsc::UnboundedSender<Event>,
    tasks: &mut JoinSet<()>,
) {
    let reconciler = reconciler.clone();
    let events = events.clone();
    match action {
        Action::RefreshStatus(cause) => {
            tasks.spawn(async move {
                let outcome = reconciler.refresh_status(cause).await;
                let _ = events.send(Event::StatusRefreshed { cause, outcome });
            });
        }
        Action::RefreshInfo => {
            tasks.spawn(async move {
                reconciler.refresh_info().await;
            });
        }
        Action::Login(trigger) => {
            tasks.spawn(async move {
                let ok = reconciler.login(trigger).await.is_ok();
                let _ = events.send(Event::ActionFinished {
                    action: Finished::Login(trigger),
                    ok,
                });
            });
        }
        Action::Logout => {
            tasks.spawn(async move {
                let ok = reconciler.logout().await.is_ok();
                let _ = events.send(Event::ActionFinished {
                    action: Finished::Logout,
                    ok,
                });
            });
        }
        Action::LogoutSession(id) => {
            tasks.spawn(async move {
                let ok = reconciler.logout_session(&id).await.is_ok();
                let _ = events.send(Event::ActionFinished {
                    action: Finished::LogoutSession(id),
                    ok,
                });
            });
        }
        Action::SetAutoManage(enabled) => reconciler.set_auto_manage(enabled),
        Action::Stop => {}
    }
}
