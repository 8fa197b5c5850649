//! Console commands
//!
//! Stands in for the tray menu when running headless: each stdin line is one
//! command. Menu verbs go through the same `MenuAction` mapping as tray
//! clicks. Auto-manage changes are persisted to the config file.
//!
//! ```text
//! login | logout | refresh | kick <session-id> | auto [on|off] | show | help | quit
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use reconciler::{Command, MenuAction, Reconciler, SchedulerHandle, build_menu, render_text};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics::record_command;

const HELP: &str =
    "commands: login | logout | refresh | kick <session-id> | auto [on|off] | show | help | quit";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Same as clicking the tray entry
    Menu(MenuAction),
    /// Explicit `auto on` / `auto off`
    SetAutoManage(bool),
    Show,
    Help,
}

impl ConsoleCommand {
    fn name(&self) -> &'static str {
        match self {
            ConsoleCommand::Menu(MenuAction::Login) => "login",
            ConsoleCommand::Menu(MenuAction::Logout) => "logout",
            ConsoleCommand::Menu(MenuAction::Refresh) => "refresh",
            ConsoleCommand::Menu(MenuAction::LogoutSession(_)) => "kick",
            ConsoleCommand::Menu(MenuAction::ToggleAutoManage) | ConsoleCommand::SetAutoManage(_) => {
                "auto"
            }
            ConsoleCommand::Menu(MenuAction::Quit) => "quit",
            ConsoleCommand::Menu(MenuAction::AccountSettings | MenuAction::About) => "other",
            ConsoleCommand::Show => "show",
            ConsoleCommand::Help => "help",
        }
    }

    /// Scheduler command for this line, given the current auto-manage flag.
    /// `None` for lines the console answers itself.
    pub fn to_scheduler(&self, auto_manage: bool) -> Option<Command> {
        match self {
            ConsoleCommand::Menu(MenuAction::Quit) => Some(Command::Shutdown),
            ConsoleCommand::Menu(action) => action.command(auto_manage),
            ConsoleCommand::SetAutoManage(enabled) => Some(Command::SetAutoManage(*enabled)),
            ConsoleCommand::Show | ConsoleCommand::Help => None,
        }
    }
}

/// Parse a console line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();

    let command = match verb.to_ascii_lowercase().as_str() {
        "login" => ConsoleCommand::Menu(MenuAction::Login),
        "logout" => ConsoleCommand::Menu(MenuAction::Logout),
        "refresh" => ConsoleCommand::Menu(MenuAction::Refresh),
        "kick" => {
            let id = arg.ok_or(Error::MissingArgument {
                command: "kick",
                expected: "<session-id>",
            })?;
            ConsoleCommand::Menu(MenuAction::LogoutSession(id.to_string()))
        }
        "auto" => match arg {
            None => ConsoleCommand::Menu(MenuAction::ToggleAutoManage),
            Some("on") => ConsoleCommand::SetAutoManage(true),
            Some("off") => ConsoleCommand::SetAutoManage(false),
            Some(other) => {
                return Err(Error::InvalidArgument {
                    command: "auto",
                    value: other.to_string(),
                });
            }
        },
        "show" => ConsoleCommand::Show,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Menu(MenuAction::Quit),
        other => return Err(Error::UnknownCommand(other.to_string())),
    };
    Ok(Some(command))
}

/// Read commands from stdin until EOF or the scheduler goes away.
///
/// EOF only ends the console; the service keeps running (e.g. when started
/// detached with stdin closed).
pub async fn run(scheduler: SchedulerHandle, reconciler: Arc<Reconciler>, config_path: PathBuf) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed, console disabled");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to read stdin, console disabled");
                return;
            }
        };

        let command = match parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        record_command(command.name());

        match command.to_scheduler(reconciler.auto_manage()) {
            Some(scheduled) => {
                let persist = match scheduled {
                    Command::SetAutoManage(enabled) => Some(enabled),
                    _ => None,
                };
                if scheduler.send(scheduled).await.is_err() {
                    debug!("scheduler stopped, console exiting");
                    return;
                }
                if let Some(enabled) = persist {
                    persist_auto_manage(config_path.clone(), enabled).await;
                }
            }
            None if command == ConsoleCommand::Show => {
                let state = reconciler.snapshot().await;
                let menu = build_menu(
                    &state,
                    reconciler.username(),
                    reconciler.auto_manage(),
                    Utc::now(),
                );
                print!("{}", render_text(&menu));
            }
            None => println!("{HELP}"),
        }
    }
}

async fn persist_auto_manage(path: PathBuf, enabled: bool) {
    let path_str = path.display().to_string();
    match tokio::task::spawn_blocking(move || Config::save_auto_manage(&path, enabled)).await {
        Ok(Ok(())) => info!(path = %path_str, enabled, "auto-manage setting saved"),
        Ok(Err(e)) => warn!(path = %path_str, error = %e, "failed to save auto-manage setting"),
        Err(e) => warn!(error = %e, "auto-manage save task failed"),
    }
}
