//! Launcher settings.
//!
//! Loaded once at startup from `<exec_dir>/steady.yaml` (or `$STEADY_CONFIG`),
//! then individual `STEADY_*` environment variables override single fields.
//! The resulting value is immutable and shared by reference.
//!
//! ```yaml
//! query_command: "pidof {program}"
//! signal_command: "kill -{signal} {pids}"
//! fetch_command: "git checkout . && git pull"
//! heartbeat_secs: 30
//! auto_update_secs: 3600
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, IdentityError};
use crate::identity::InstanceIdentity;

pub const SETTINGS_FILE: &str = "steady.yaml";
pub const CONFIG_ENV: &str = "STEADY_CONFIG";

pub const DEFAULT_LOG_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_LOG_MAX_FILES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Lists pids of processes named `{program}`.
    pub query_command: String,
    /// Delivers `{signal}` (e.g. `HUP`) to the space-separated `{pids}`.
    pub signal_command: String,
    /// Pulls new source; its output must mention `change_marker` on change.
    pub fetch_command: String,
    /// Rebuilds `{exec_dir}/{program}` in place.
    pub build_command: String,
    /// Where fetch and build run; the executable directory when unset.
    pub source_dir: Option<PathBuf>,
    pub change_marker: String,
    /// Run in place instead of relaunching detached.
    pub foreground: bool,
    /// Pull and rebuild before the bootstrap relaunch.
    pub rebuild_on_start: bool,
    pub heartbeat_secs: u64,
    /// Period of the worker's self-update loop; disabled when unset or 0.
    pub auto_update_secs: Option<u64>,
    /// How long a `-graceful` replacement waits for the old primary's lock.
    pub handoff_wait_secs: u64,
    /// Size at which `<program>.out` is rotated; 0 disables rotation.
    pub log_max_bytes: u64,
    pub log_max_files: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            query_command: "pidof {program}".to_string(),
            signal_command: "kill -{signal} {pids}".to_string(),
            fetch_command: "git checkout . && git pull".to_string(),
            build_command: "cargo build --release --bin {program} \
                && cp target/release/{program} {exec_dir}/{program}.new \
                && mv -f {exec_dir}/{program}.new {exec_dir}/{program}"
                .to_string(),
            source_dir: None,
            change_marker: "changed".to_string(),
            foreground: false,
            rebuild_on_start: false,
            heartbeat_secs: 60,
            auto_update_secs: None,
            handoff_wait_secs: 30,
            log_max_bytes: DEFAULT_LOG_MAX_BYTES,
            log_max_files: DEFAULT_LOG_MAX_FILES,
        }
    }
}

impl Settings {
    /// Load settings for `identity` using the process environment.
    pub fn load(identity: &InstanceIdentity) -> Result<Self, ConfigError> {
        Self::load_with(identity, |key| std::env::var(key).ok())
    }

    /// Load settings with an explicit environment lookup.
    ///
    /// An explicit `STEADY_CONFIG` must exist; the default file is optional.
    pub fn load_with(
        identity: &InstanceIdentity,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut settings = match env(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => match identity.exec_dir() {
                Ok(dir) if dir.join(SETTINGS_FILE).is_file() => {
                    Self::from_file(&dir.join(SETTINGS_FILE))?
                }
                _ => Self::default(),
            },
        };
        settings.apply_overrides(env)?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut settings: Self = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.auto_update_secs = settings.auto_update_secs.filter(|secs| *secs > 0);
        Ok(settings)
    }

    /// Apply `STEADY_*` overrides on top of the current values.
    pub fn apply_overrides(
        &mut self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = env("STEADY_QUERY_COMMAND") {
            self.query_command = value;
        }
        if let Some(value) = env("STEADY_SIGNAL_COMMAND") {
            self.signal_command = value;
        }
        if let Some(value) = env("STEADY_FETCH_COMMAND") {
            self.fetch_command = value;
        }
        if let Some(value) = env("STEADY_BUILD_COMMAND") {
            self.build_command = value;
        }
        if let Some(value) = env("STEADY_SOURCE_DIR") {
            self.source_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = env("STEADY_FOREGROUND") {
            self.foreground = parse_bool("STEADY_FOREGROUND", &value)?;
        }
        if let Some(value) = env("STEADY_HEARTBEAT_SECS") {
            self.heartbeat_secs = parse_secs("STEADY_HEARTBEAT_SECS", &value)?;
        }
        if let Some(value) = env("STEADY_AUTO_UPDATE_SECS") {
            self.auto_update_secs = match parse_secs("STEADY_AUTO_UPDATE_SECS", &value)? {
                0 => None,
                secs => Some(secs),
            };
        }
        Ok(())
    }

    /// Directory fetch and build run in.
    pub fn source_dir(&self, identity: &InstanceIdentity) -> Result<PathBuf, IdentityError> {
        match &self.source_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(identity.exec_dir()?.to_path_buf()),
        }
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidOverride {
            key,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn parse_secs(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|err: std::num::ParseIntError| ConfigError::InvalidOverride {
            key,
            value: value.to_string(),
            reason: err.to_string(),
        })
}
