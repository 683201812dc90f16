//! Configuration loading for the launcher core.
//!
//! Config files are looked up as `nexus.{toml,yaml,yml,json}` in the working
//! directory, then in `~/.config/nexus/`. `${VAR}` placeholders are expanded
//! from the environment before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{clear_config_dir, config_dir, discover_and_load, load_config, set_config_dir},
    schema::{ChannelConfig, ClientConfig, DiscoveryConfig, NexusConfig, WatchdogConfig},
};
