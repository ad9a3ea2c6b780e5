//! Configuration loading and management

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::hotkey::TriggerKey;

/// Overrides the trigger key code
pub const TRIGGER_KEY_VAR: &str = "GLOBE_SWITCH_TRIGGER_KEY";
/// Overrides the IPC socket path
pub const SOCKET_VAR: &str = "GLOBE_SWITCH_SOCKET";
/// Overrides the runtime data directory
pub const DATA_DIR_VAR: &str = "GLOBE_SWITCH_DATA_DIR";

const SOCKET_NAME: &str = "daemon.sock";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Key whose press cycles input sources
    pub trigger: TriggerKey,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = match lookup(DATA_DIR_VAR) {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = lookup("HOME").context("HOME is not set")?;
                PathBuf::from(home)
                    .join(".local")
                    .join("share")
                    .join("globe-switch")
            }
        };

        let socket_path = lookup(SOCKET_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(SOCKET_NAME));

        let trigger = match lookup(TRIGGER_KEY_VAR) {
            Some(raw) => {
                let code = raw
                    .trim()
                    .parse::<u16>()
                    .with_context(|| format!("invalid {TRIGGER_KEY_VAR} value {raw:?}"))?;
                TriggerKey::new(code)
            }
            None => TriggerKey::default(),
        };

        Ok(Self {
            socket_path,
            data_dir,
            trigger,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}
