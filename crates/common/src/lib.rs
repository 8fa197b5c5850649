//! Common types shared by the net-tray crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
