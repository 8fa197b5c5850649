//! Console command errors

use thiserror::Error;

/// Errors from parsing a console line into a command.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("unknown command: {0} (try `help`)")]
    UnknownCommand(String),

    #[error("{command} needs an argument: {expected}")]
    MissingArgument {
        command: &'static str,
        expected: &'static str,
    },

    #[error("invalid argument for {command}: {value}")]
    InvalidArgument { command: &'static str, value: String },
}

/// Result alias using console Error
pub type Result<T> = std::result::Result<T, Error>;
