//! Stored account passwords
//!
//! The password is kept in the platform credential store (Keychain,
//! Credential Manager, kernel keyutils) under the service name below, keyed
//! by username.

use common::Secret;

/// Keyring service name for account passwords
pub const KEYRING_SERVICE: &str = "net.tsinghua";

/// Lookup of a stored password for a username.
pub trait PasswordStore {
    /// `Ok(None)` when nothing is stored for `username`.
    fn password(&self, username: &str) -> common::Result<Option<Secret<String>>>;
}

/// OS keyring backed store
pub struct KeyringStore;

impl PasswordStore for KeyringStore {
    fn password(&self, username: &str) -> common::Result<Option<Secret<String>>> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, username).map_err(keyring_error)?;
        match entry.get_password() {
            Ok(password) => Ok(Secret::from_trimmed(&password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(keyring_error(e)),
        }
    }
}

fn keyring_error(err: keyring::Error) -> common::Error {
    common::Error::Config(format!("keyring error: {err}"))
}
