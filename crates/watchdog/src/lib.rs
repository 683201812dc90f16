//! Process watchdog: which catalog games are running on this machine, and
//! which store app the platform client reports.

pub mod error;
pub mod normalize;
pub mod source;
pub mod store;
pub mod watchdog;

pub use {
    error::WatchdogError,
    normalize::{PROCESS_NAME_LIMIT, normalize_executable},
    source::{ProcessSource, SystemProcessSource},
    watchdog::{Observation, ProcessWatchdog},
};
