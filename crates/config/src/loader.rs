use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::NexusConfig};

/// File stem shared by every supported config format.
const CONFIG_STEM: &str = "nexus";

/// Directory pinned by `--config-dir` (or a test).
static PINNED_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Yaml,
    Json,
}

impl Format {
    /// Lookup order when several files sit in the same directory.
    const ALL: [(&'static str, Format); 4] = [
        ("toml", Format::Toml),
        ("yaml", Format::Yaml),
        ("yml", Format::Yaml),
        ("json", Format::Json),
    ];

    /// Files without an extension are read as TOML.
    fn of(path: &Path) -> anyhow::Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        Self::ALL
            .iter()
            .find(|(known, _)| *known == ext)
            .map(|(_, format)| *format)
            .ok_or_else(|| anyhow::anyhow!("unsupported config format: .{ext}"))
    }

    fn parse(self, raw: &str) -> anyhow::Result<NexusConfig> {
        Ok(match self {
            Self::Toml => toml::from_str(raw)?,
            Self::Yaml => serde_yaml::from_str(raw)?,
            Self::Json => serde_json::from_str(raw)?,
        })
    }
}

/// Pin config lookup to `path`. The working directory and the per-user
/// directory are then ignored until [`clear_config_dir`].
pub fn set_config_dir(path: PathBuf) {
    *PINNED_DIR.lock().unwrap_or_else(|e| e.into_inner()) = Some(path);
}

pub fn clear_config_dir() {
    *PINNED_DIR.lock().unwrap_or_else(|e| e.into_inner()) = None;
}

fn pinned_dir() -> Option<PathBuf> {
    PINNED_DIR.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Read one launcher config file. `${VAR}` placeholders are expanded before
/// the file is parsed in the format its extension names.
pub fn load_config(path: &Path) -> anyhow::Result<NexusConfig> {
    let format = Format::of(path)?;
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    format.parse(&substitute_env(&raw))
}

/// Launcher settings for this machine.
///
/// Uses the first `nexus.*` file found in the pinned directory, or else in
/// the working directory and then `~/.config/nexus/`. A missing or broken
/// file leaves the launcher on built-in defaults: the ports, timings and
/// reconnect policy of the LAN protocol.
pub fn discover_and_load() -> NexusConfig {
    let Some(path) = search_dirs().iter().find_map(|dir| config_file_in(dir)) else {
        debug!("no nexus config file, using defaults");
        return NexusConfig::default();
    };

    debug!(path = %path.display(), "loading nexus config");
    load_config(&path).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "unusable nexus config, using defaults");
        NexusConfig::default()
    })
}

fn search_dirs() -> Vec<PathBuf> {
    match pinned_dir() {
        Some(dir) => vec![dir],
        None => std::iter::once(PathBuf::from("."))
            .chain(user_config_dir())
            .collect(),
    }
}

fn config_file_in(dir: &Path) -> Option<PathBuf> {
    Format::ALL
        .iter()
        .map(|(ext, _)| dir.join(format!("{CONFIG_STEM}.{ext}")))
        .find(|p| p.is_file())
}

/// Where the launcher keeps its config: the pinned directory, or
/// `~/.config/nexus/`.
pub fn config_dir() -> Option<PathBuf> {
    pinned_dir().or_else(user_config_dir)
}

fn user_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join(CONFIG_STEM))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_partial_toml_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nexus.toml");
        std::fs::write(
            &path,
            r#"
[client]
client_id = "rig-01"

[discovery]
settle_ms = 500
localhost_ports = [4000]

[channel]
ws_path = "/socket"
"#,
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.client.client_id.as_deref(), Some("rig-01"));
        assert_eq!(cfg.discovery.settle_ms, 500);
        assert_eq!(cfg.discovery.localhost_ports, vec![4000]);
        assert_eq!(cfg.discovery.ceiling_ms, 5_000);
        assert_eq!(cfg.channel.ws_path, "/socket");
        assert_eq!(cfg.watchdog.tick_ms, 1_000);
    }

    #[test]
    fn loads_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let yaml = dir.path().join("nexus.yaml");
        std::fs::write(&yaml, "watchdog:\n  cross_check_ms: 30000\n").unwrap();
        assert_eq!(load_config(&yaml).unwrap().watchdog.cross_check_ms, 30_000);

        let json = dir.path().join("nexus.json");
        std::fs::write(&json, r#"{"channel":{"status_timeout_ms":750}}"#).unwrap();
        assert_eq!(load_config(&json).unwrap().channel.status_timeout_ms, 750);
    }

    #[test]
    fn substitutes_env_with_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nexus.toml");
        std::fs::write(
            &path,
            "[client]\nserver_address = \"${NEXUS_TEST_UNSET_ADDR:-http://10.1.1.1:3000}\"\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(
            cfg.client.server_address.as_deref(),
            Some("http://10.1.1.1:3000")
        );
    }

    #[test]
    fn yml_and_extensionless_files_are_recognized() {
        assert_eq!(Format::of(Path::new("nexus.yml")).unwrap(), Format::Yaml);
        assert_eq!(Format::of(Path::new("launcher")).unwrap(), Format::Toml);
        assert!(Format::of(Path::new("nexus.ini")).is_err());
    }

    #[test]
    fn toml_wins_over_json_in_the_same_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nexus.json"), r#"{"watchdog":{"tick_ms":9}}"#).unwrap();
        std::fs::write(dir.path().join("nexus.toml"), "[watchdog]\ntick_ms = 7\n").unwrap();

        let found = config_file_in(dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "nexus.toml");
        assert_eq!(load_config(&found).unwrap().watchdog.tick_ms, 7);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nexus.ini");
        std::fs::write(&path, "x=1").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn override_dir_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("nexus.toml"),
            "[discovery]\nserver_port = 51000\n",
        )
        .unwrap();

        set_config_dir(dir.path().to_path_buf());
        let cfg = discover_and_load();
        assert_eq!(config_dir().as_deref(), Some(dir.path()));
        clear_config_dir();

        assert_eq!(cfg.discovery.server_port, 51000);
    }
}
