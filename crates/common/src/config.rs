// VMDB - Managed VM Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Debugger configuration
//!
//! Platform parameters (watchpoint capacity, trap encoding, program counter
//! adjustment after a trap, word size), breakpoint policy and log output,
//! stored as TOML in `~/.vmdb.toml`. Missing keys fall back to their defaults.

use std::{
    fs,
    path::{Path, PathBuf},
};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Top-level debugger configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebuggerConfig {
    /// Parameters describing the debuggee platform
    pub platform: PlatformConfig,
    /// Breakpoint management policy
    pub breakpoints: BreakpointConfig,
    /// Log output
    pub log: LogConfig,
}

/// Parameters of the platform the debuggee runs on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Maximum number of watchpoints (client and system together) the platform can hold
    pub watchpoint_capacity: usize,
    /// Encoding of the trap instruction patched in at a breakpoint address
    pub trap_instruction: Vec<u8>,
    /// Number of bytes past the trap the platform reports as the instruction pointer
    pub trap_pc_adjustment: u64,
    /// Size of a machine word in bytes
    pub word_size: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            watchpoint_capacity: 4,
            trap_instruction: vec![0xCC],
            trap_pc_adjustment: 1,
            word_size: 8,
        }
    }
}

/// Breakpoint management policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakpointConfig {
    /// Also stop the debuggee when a compilation starts, not only when it completes
    pub compilation_started_hook: bool,
}

/// Where and how verbosely to log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: String,
    /// Also write a daily-rotated log file
    pub file: bool,
    /// Directory for log files; defaults to the user cache directory
    pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), file: false, directory: None }
    }
}

impl DebuggerConfig {
    /// Get the config file path (~/.vmdb.toml)
    pub fn config_path() -> Result<PathBuf> {
        let home =
            dirs::home_dir().ok_or_else(|| eyre::eyre!("Unable to determine home directory"))?;
        Ok(home.join(".vmdb.toml"))
    }

    /// Load configuration from the default location, creating a default file if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found, creating default at {:?}", config_path);
            let default_config = Self::default();
            default_config.save_to(&config_path)?;
            return Ok(default_config);
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;

        let config: Self =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;
        config.validate()?;

        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config to TOML")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {path:?}"))?;

        debug!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Reject configurations the control plane cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.platform.trap_instruction.is_empty() {
            eyre::bail!("platform.trap_instruction must not be empty");
        }
        if self.platform.word_size == 0 {
            eyre::bail!("platform.word_size must be positive");
        }
        if self.log.level.parse::<tracing::Level>().is_err() {
            eyre::bail!("log.level {:?} is not a log level", self.log.level);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::ensure_test_logging;

    #[test]
    fn test_default_config() {
        ensure_test_logging(None);
        let config = DebuggerConfig::default();

        assert_eq!(config.platform.watchpoint_capacity, 4);
        assert_eq!(config.platform.trap_instruction, vec![0xCC]);
        assert_eq!(config.platform.trap_pc_adjustment, 1);
        assert_eq!(config.platform.word_size, 8);
        assert!(!config.breakpoints.compilation_started_hook);
        assert_eq!(config.log.level, "info");
        assert!(!config.log.file);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        ensure_test_logging(None);
        let config: DebuggerConfig = toml::from_str(
            r#"
            [platform]
            watchpoint_capacity = 16
            "#,
        )
        .unwrap();

        assert_eq!(config.platform.watchpoint_capacity, 16);
        assert_eq!(config.platform.trap_instruction, vec![0xCC]);
        assert!(!config.breakpoints.compilation_started_hook);
    }

    #[test]
    fn test_save_and_load_from_path() {
        ensure_test_logging(None);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vmdb.toml");

        let mut config = DebuggerConfig::default();
        config.platform.trap_instruction = vec![0x00, 0x00, 0x20, 0xD4];
        config.platform.trap_pc_adjustment = 0;
        config.breakpoints.compilation_started_hook = true;
        config.save_to(&path).unwrap();

        let loaded = DebuggerConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_config_rejected() {
        ensure_test_logging(None);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vmdb.toml");
        std::fs::write(&path, "[platform]\ntrap_instruction = []\n").unwrap();

        let err = DebuggerConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("trap_instruction"));
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        ensure_test_logging(None);
        let mut config = DebuggerConfig::default();
        config.log.level = "chatty".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("log.level"));
        config.log.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_toml_rejected() {
        ensure_test_logging(None);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vmdb.toml");
        std::fs::write(&path, "[platform\nword_size = ").unwrap();

        assert!(DebuggerConfig::load_from(&path).is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_load_creates_default_file() {
        ensure_test_logging(None);
        let dir = tempfile::tempdir().unwrap();
        let previous_home = std::env::var_os("HOME");
        std::env::set_var("HOME", dir.path());

        let config = DebuggerConfig::load();
        let created = dir.path().join(".vmdb.toml").exists();

        match previous_home {
            Some(home) => std::env::set_var("HOME", home),
            None => std::env::remove_var("HOME"),
        }

        assert_eq!(config.unwrap(), DebuggerConfig::default());
        assert!(created);
    }
}
