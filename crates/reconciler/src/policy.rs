//! Auto-manage policy

use crate::state::{AccountState, Status};

/// Inputs the policy reads besides the account state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyConfig {
    pub auto_manage_enabled: bool,
    pub has_configured_account: bool,
}

/// Log in automatically when the link is offline, auto-manage is on and
/// there is an account to log in with.
pub fn should_auto_login(state: &AccountState, config: &PolicyConfig) -> bool {
    state.status == Status::Offline && config.auto_manage_enabled && config.has_configured_account
}
