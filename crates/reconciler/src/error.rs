//! Error types for reconciler operations

/// Errors from user-initiated actions and the scheduler handle.
///
/// Refresh cycles never return these: probe failures during a refresh are
/// folded into `AccountState` instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no account configured")]
    NoAccount,

    #[error(transparent)]
    Probe(#[from] probe::ProbeError),

    #[error("scheduler is not running")]
    SchedulerStopped,
}

/// Result alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;
