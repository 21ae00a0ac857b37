use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::CourierConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "courier.toml",
    "courier.yaml",
    "courier.yml",
    "courier.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<CourierConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `config_dir/courier.{toml,yaml,yml,json}` when a directory is given
/// 2. `./courier.{toml,yaml,yml,json}` (project-local)
/// 3. `~/.config/courier/courier.{toml,yaml,yml,json}` (user-global)
///
/// Returns `CourierConfig::default()` if no config file is found.
pub fn discover_and_load(config_dir: Option<&Path>) -> CourierConfig {
    if let Some(path) = find_config_file(config_dir) {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    CourierConfig::default()
}

/// Find the first config file in standard locations.
fn find_config_file(config_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = config_dir {
        return first_existing(dir);
    }

    // Project-local
    if let Some(p) = first_existing(Path::new(".")) {
        return Some(p);
    }

    config_dir_default().and_then(|dir| first_existing(&dir))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/courier/`).
pub fn config_dir_default() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "courier").map(|d| d.config_dir().to_path_buf())
}

/// Resolve the data directory: explicit override, then `data_dir` from the
/// config, then the platform data dir, then `./.courier`.
pub fn data_dir(config: &CourierConfig, override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    if let Some(dir) = config.data_dir.as_ref() {
        return dir.clone();
    }
    directories::ProjectDirs::from("", "", "courier")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".courier"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<CourierConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_yaml_from_explicit_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("courier.yaml"),
            "messages:\n  inbound:\n    debounce_ms: 250\nchannels:\n  sms:\n    main:\n      token: abc\n",
        )
        .unwrap();

        let cfg = discover_and_load(Some(dir.path()));
        assert_eq!(cfg.messages.inbound.debounce_ms, 250);
        assert_eq!(cfg.channels.sms["main"]["token"], "abc");
    }

    #[test]
    fn toml_wins_over_json_in_same_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("courier.toml"),
            "[messages.inbound]\ndebounce_ms = 10\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("courier.json"),
            r#"{"messages":{"inbound":{"debounce_ms":20}}}"#,
        )
        .unwrap();

        let cfg = discover_and_load(Some(dir.path()));
        assert_eq!(cfg.messages.inbound.debounce_ms, 10);
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("courier.toml"), "not = [valid").unwrap();
        let cfg = discover_and_load(Some(dir.path()));
        assert!(cfg.channels.sms.is_empty());
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = parse_config("", Path::new("courier.ini")).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn data_dir_prefers_override() {
        let cfg = CourierConfig {
            data_dir: Some(PathBuf::from("/from/config")),
            ..Default::default()
        };
        assert_eq!(
            data_dir(&cfg, Some(Path::new("/from/flag"))),
            PathBuf::from("/from/flag")
        );
        assert_eq!(data_dir(&cfg, None), PathBuf::from("/from/config"));
    }
}
