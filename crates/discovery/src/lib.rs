//! LAN discovery of launcher servers.
//!
//! A [`DiscoveryProbe`] broadcasts the protocol token on every usable IPv4
//! interface and collects the JSON replies into [`ServerCandidate`]s. The
//! [`ServerWatcher`] repeats scans and ages candidates out after consecutive
//! misses.

pub mod api;
pub mod candidates;
pub mod error;
pub mod interfaces;
pub mod probe;
pub mod watcher;

pub use {
    api::ServerApi,
    candidates::{CandidateSet, MergeReport, ServerCandidate},
    error::DiscoveryError,
    interfaces::NetworkInterface,
    probe::{DiscoveryProbe, ProbeOptions, discover_update_server, pick_preferred},
    watcher::{DiscoveryEvent, ServerWatcher},
};
