//! Session reconciler.
//!
//! Drives the session lifecycle from watchdog observations (a session opens
//! only once a game's process is seen and closes the first tick it is gone)
//! and periodically cross-checks the server's record against local state.

pub mod backend;
pub mod reconciler;

pub use {
    backend::SessionBackend,
    reconciler::{Command, Reconciler, ReconcilerEvent, ReconcilerHandle, ReconcilerOptions},
};
