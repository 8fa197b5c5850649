//! Tray menu model
//!
//! Builds the entries the tray shows for a given state. The tray toolkit
//! turns these into native menu items; clicking an entry with an `action`
//! sends the matching scheduler command.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::format::{balance_str, time_passed_str, usage_str};
use crate::scheduler::Command;
use crate::state::AccountState;

/// Menu click target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "arg", rename_all = "snake_case")]
pub enum MenuAction {
    Login,
    Logout,
    Refresh,
    LogoutSession(String),
    ToggleAutoManage,
    AccountSettings,
    About,
    Quit,
}

impl MenuAction {
    /// Scheduler command for this click, if the core handles it.
    /// Settings, about and quit are handled by the tray shell.
    pub fn command(&self, auto_manage: bool) -> Option<Command> {
        match self {
            MenuAction::Login => Some(Command::Login),
            MenuAction::Logout => Some(Command::Logout),
            MenuAction::Refresh => Some(Command::Refresh),
            MenuAction::LogoutSession(id) => Some(Command::LogoutSession(id.clone())),
            MenuAction::ToggleAutoManage => Some(Command::SetAutoManage(!auto_manage)),
            MenuAction::AccountSettings | MenuAction::About | MenuAction::Quit => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MenuEntry {
    /// Disabled informational line
    Label { text: String },
    Separator,
    Item { text: String, action: MenuAction },
    Checkbox {
        text: String,
        checked: bool,
        action: MenuAction,
    },
    Submenu { text: String, entries: Vec<MenuEntry> },
}

fn label(text: impl Into<String>) -> MenuEntry {
    MenuEntry::Label { text: text.into() }
}

fn item(text: &str, action: MenuAction) -> MenuEntry {
    MenuEntry::Item {
        text: text.to_string(),
        action,
    }
}

/// Build the full tray menu for `state`.
pub fn build_menu(
    state: &AccountState,
    username: Option<&str>,
    auto_manage: bool,
    now: DateTime<Utc>,
) -> Vec<MenuEntry> {
    let mut entries = Vec::new();

    let mut status_line = state.status.label().to_string();
    if state.status.has_session() {
        if let Some(session) = &state.current_session {
            status_line = format!("{status_line}-{}", usage_str(Some(session.usage_bytes)));
        }
    }
    entries.push(label(status_line));
    entries.push(label(format!(
        "状态检查：{}",
        time_passed_str(state.last_status_check, now)
    )));

    entries.push(MenuEntry::Separator);
    match username {
        None => entries.push(label("未设置帐号")),
        Some(name) => {
            entries.push(label(name));
            entries.push(label(format!("本月流量：{}", usage_str(state.total_usage_bytes))));
            entries.push(label(format!("当前余额：{}", balance_str(state.balance))));
        }
    }

    entries.push(MenuEntry::Separator);
    if state.sessions.is_empty() {
        entries.push(label("无设备在线"));
    } else {
        entries.push(label("当前在线"));
        for session in &state.sessions {
            entries.push(MenuEntry::Submenu {
                text: session.device_name.clone(),
                entries: vec![
                    label(session.ip.clone()),
                    label(format!("{}上线", time_passed_str(Some(session.start_time), now))),
                    label(format!("≥ {}", usage_str(Some(session.usage_bytes)))),
                    item("下线", MenuAction::LogoutSession(session.id.clone())),
                ],
            });
        }
    }
    // Usage, balance and sessions come from the account probe
    let figures_checked = match username {
        Some(_) => state.last_info_check,
        None => state.last_status_check,
    };
    entries.push(label(format!(
        "上次更新：{}",
        time_passed_str(figures_checked, now)
    )));

    entries.push(MenuEntry::Separator);
    entries.push(item("上线", MenuAction::Login));
    entries.push(item("下线", MenuAction::Logout));
    entries.push(item("现在刷新", MenuAction::Refresh));

    entries.push(MenuEntry::Separator);
    entries.push(MenuEntry::Checkbox {
        text: "自动管理".to_string(),
        checked: auto_manage,
        action: MenuAction::ToggleAutoManage,
    });
    entries.push(item("账号设置...", MenuAction::AccountSettings));

    entries.push(MenuEntry::Separator);
    entries.push(item("关于 net-tray", MenuAction::About));

    entries.push(MenuEntry::Separator);
    entries.push(item("退出", MenuAction::Quit));

    entries
}

/// Plain-text rendering, one line per entry, submenus indented.
pub fn render_text(entries: &[MenuEntry]) -> String {
    let mut out = String::new();
    write_entries(&mut out, entries, 0);
    out
}

fn write_entries(out: &mut String, entries: &[MenuEntry], depth: usize) {
    let indent = "  ".repeat(depth);
    for entry in entries {
        match entry {
            MenuEntry::Label { text } => out.push_str(&format!("{indent}{text}\n")),
            MenuEntry::Separator => out.push_str(&format!("{indent}----\n")),
            MenuEntry::Item { text, .. } => out.push_str(&format!("{indent}[{text}]\n")),
            MenuEntry::Checkbox { text, checked, .. } => {
                let mark = if *checked { "x" } else { " " };
                out.push_str(&format!("{indent}[{mark}] {text}\n"));
            }
            MenuEntry::Submenu { text, entries } => {
                out.push_str(&format!("{indent}{text} >\n"));
                write_entries(out, entries, depth + 1);
            }
        }
    }
}
