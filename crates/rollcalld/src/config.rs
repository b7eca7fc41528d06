use rollcall_core::ledger::DEFAULT_MARK_COOLDOWN;
use rollcall_core::notify::{DEFAULT_MAX_IN_FLIGHT, DEFAULT_NOTIFY_COOLDOWN, DEFAULT_TRANSPORT_TIMEOUT};
use rollcall_core::stabilizer::{
    StabilizerConfig, DEFAULT_ACCEPTANCE_THRESHOLD, DEFAULT_FACE_LOSS_RESET_FRAMES,
    DEFAULT_REQUIRED_STABLE_FRAMES,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration: defaults, then an optional TOML file, then `ROLLCALL_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding one `YYYY-MM-DD.csv` attendance log per day.
    pub ledger_dir: PathBuf,
    /// Classifier distance below which a face counts as a match.
    pub acceptance_threshold: f32,
    /// Consecutive matching frames before a person is marked.
    pub required_stable_frames: u32,
    /// Consecutive faceless frames before the tracked identity is dropped.
    pub face_loss_reset_frames: u32,
    /// Minimum seconds between two marks for the same person.
    pub mark_cooldown_secs: u64,
    /// Minimum seconds between two notifications for the same person.
    pub notify_cooldown_secs: u64,
    pub notify_enabled: bool,
    /// Opaque destination handed to the notify command (chat id, address, ...).
    pub notify_destination: Option<String>,
    /// Program run once per notification.
    pub notify_command: Option<PathBuf>,
    /// Hard timeout on a single notification attempt.
    pub notify_timeout_secs: u64,
    /// Notifications allowed in flight at once; extra ones are dropped.
    pub notify_max_in_flight: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ledger_dir: rollcall_core::default_ledger_dir(),
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            required_stable_frames: DEFAULT_REQUIRED_STABLE_FRAMES,
            face_loss_reset_frames: DEFAULT_FACE_LOSS_RESET_FRAMES,
            mark_cooldown_secs: DEFAULT_MARK_COOLDOWN.as_secs(),
            notify_cooldown_secs: DEFAULT_NOTIFY_COOLDOWN.as_secs(),
            notify_enabled: false,
            notify_destination: None,
            notify_command: None,
            notify_timeout_secs: DEFAULT_TRANSPORT_TIMEOUT.as_secs(),
            notify_max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl Config {
    /// Load configuration from the config file (if any) and the environment.
    ///
    /// `ROLLCALL_CONFIG` names the file explicitly and must exist; otherwise
    /// `$XDG_CONFIG_HOME/rollcall/config.toml` is used when present.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => {
                let path = config_dir().join("config.toml");
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `ROLLCALL_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("ROLLCALL_LEDGER_DIR") {
            self.ledger_dir = PathBuf::from(dir);
        }
        override_parsed(&lookup, "ROLLCALL_ACCEPTANCE_THRESHOLD", &mut self.acceptance_threshold);
        override_parsed(&lookup, "ROLLCALL_REQUIRED_STABLE_FRAMES", &mut self.required_stable_frames);
        override_parsed(&lookup, "ROLLCALL_FACE_LOSS_RESET_FRAMES", &mut self.face_loss_reset_frames);
        override_parsed(&lookup, "ROLLCALL_MARK_COOLDOWN_SECS", &mut self.mark_cooldown_secs);
        override_parsed(&lookup, "ROLLCALL_NOTIFY_COOLDOWN_SECS", &mut self.notify_cooldown_secs);
        override_parsed(&lookup, "ROLLCALL_NOTIFY_TIMEOUT_SECS", &mut self.notify_timeout_secs);
        override_parsed(&lookup, "ROLLCALL_NOTIFY_MAX_IN_FLIGHT", &mut self.notify_max_in_flight);
        if let Some(v) = lookup("ROLLCALL_NOTIFY_ENABLED") {
            self.notify_enabled = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        if let Some(dest) = lookup("ROLLCALL_NOTIFY_DESTINATION") {
            self.notify_destination = Some(dest);
        }
        if let Some(cmd) = lookup("ROLLCALL_NOTIFY_COMMAND") {
            self.notify_command = Some(PathBuf::from(cmd));
        }
    }

    pub fn stabilizer(&self) -> StabilizerConfig {
        StabilizerConfig {
            acceptance_threshold: self.acceptance_threshold,
            required_stable_frames: self.required_stable_frames.max(1),
            face_loss_reset_frames: self.face_loss_reset_frames.max(1),
        }
    }

    pub fn mark_cooldown(&self) -> Duration {
        Duration::from_secs(self.mark_cooldown_secs)
    }

    pub fn notify_cooldown(&self) -> Duration {
        Duration::from_secs(self.notify_cooldown_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    /// Destination and command for notifications, if they are enabled and complete.
    pub fn notify_target(&self) -> Option<(&str, &Path)> {
        if !self.notify_enabled {
            tracing::info!("notifications disabled");
            return None;
        }
        match (&self.notify_destination, &self.notify_command) {
            (Some(dest), Some(cmd)) => Some((dest.as_str(), cmd.as_path())),
            (None, _) => {
                tracing::warn!("notifications enabled but notify_destination is missing; disabling");
                None
            }
            (_, None) => {
                tracing::warn!("notifications enabled but notify_command is missing; disabling");
                None
            }
        }
    }
}

fn override_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
    }
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".config"))
        .join("rollcall")
}

fn home() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}
