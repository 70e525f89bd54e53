//! Resource manager access.
//!
//! [`RmClient`] speaks the four-call dispatch protocol against a single
//! endpoint per call; [`RmDirectory`] is the read-only view of the
//! registered managers.

mod client;
mod directory;

pub use client::{RmClient, RmClientConfig, RmError};
pub use directory::RmDirectory;
