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

//! Logging setup for VMDB components
//!
//! Console output is always on. A [`LogConfig`] can add a daily-rotated log
//! file, which is where the per-trap debug output of the control plane belongs:
//! the console filter keeps trap handling and realization at `info` unless
//! `RUST_LOG` says otherwise.

use std::{env, fs, path::PathBuf, sync::Once};

use eyre::{eyre, Result};
use tracing::Level;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt::{self, time::LocalTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::LogConfig;

/// Targets that log at debug level on every trap or compilation event.
const CHATTY_TARGETS: &[&str] = &["vmdb_engine::realization", "vmdb_engine::breakpoint::manager"];

/// Install the global subscriber for `component` as described by `config`.
///
/// Fails if a subscriber is already installed or the log directory cannot be
/// created.
pub fn init_logging(component: &str, config: &LogConfig) -> Result<()> {
    let console = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_timer(LocalTime::rfc_3339())
        .with_ansi(true)
        .compact()
        .with_filter(console_filter(&config.level)?);

    if !config.file {
        tracing_subscriber::registry()
            .with(console)
            .try_init()
            .map_err(|e| eyre!("Failed to initialize tracing subscriber: {e}"))?;
        tracing::info!(component, level = %config.level, "console logging ready");
        return Ok(());
    }

    let log_dir = log_directory(component, config)?;
    let (writer, guard) = non_blocking(rolling::daily(&log_dir, format!("{component}.log")));
    // Flushed on drop; the subscriber lives for the whole process.
    std::mem::forget(guard);
    let file = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(LocalTime::rfc_3339())
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(env_filter(&config.level)?);

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize tracing subscriber: {e}"))?;
    tracing::info!(component, log_dir = %log_dir.display(), "console and file logging ready");
    Ok(())
}

/// `RUST_LOG` if set, `level` otherwise.
fn env_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| eyre!("Failed to create log filter: {e}"))
}

fn console_filter(level: &str) -> Result<EnvFilter> {
    if env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return env_filter(level);
    }
    CHATTY_TARGETS.iter().try_fold(env_filter(level)?, |filter, target| {
        let directive = format!("{target}=info").parse().map_err(|e| eyre!("Invalid log directive: {e}"))?;
        Ok(filter.add_directive(directive))
    })
}

/// `<directory or user cache dir>/vmdb/logs/<component>`, created if missing.
fn log_directory(component: &str, config: &LogConfig) -> Result<PathBuf> {
    let base = match &config.directory {
        Some(directory) => directory.clone(),
        None => dirs::cache_dir().unwrap_or_else(env::temp_dir).join("vmdb").join("logs"),
    };
    let log_dir = base.join(component);
    fs::create_dir_all(&log_dir)?;
    Ok(log_dir)
}

static TEST_LOGGING_INIT: Once = Once::new();

/// Console logging for tests; safe to call from every test.
///
/// Compact output at `default_level` (INFO if `None`) unless `RUST_LOG` is set.
/// Only the first call has any effect.
///
/// ```rust
/// vmdb_common::logging::ensure_test_logging(None);
/// tracing::info!("Running test");
/// ```
pub fn ensure_test_logging(default_level: Option<Level>) {
    TEST_LOGGING_INIT.call_once(|| {
        let level = default_level.unwrap_or(Level::INFO);
        if let Ok(filter) = env_filter(level.as_str()) {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_test_writer()
                .compact()
                .try_init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, info};

    #[test]
    fn test_ensure_test_logging_is_idempotent() {
        ensure_test_logging(None);
        ensure_test_logging(Some(Level::DEBUG));
        info!("test logging ready");
        debug!("filtered out at the default level");
    }

    #[test]
    fn test_log_directory_under_configured_base() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig { directory: Some(dir.path().to_path_buf()), ..LogConfig::default() };
        let log_dir = log_directory("vmdb-engine", &config).unwrap();
        assert!(log_dir.is_dir());
        assert_eq!(log_dir, dir.path().join("vmdb-engine"));
    }

    #[test]
    fn test_console_filter_quiets_chatty_targets() {
        if env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
            return;
        }
        let filter = console_filter("debug").unwrap().to_string();
        assert!(filter.contains("vmdb_engine::realization=info"));
        assert!(filter.contains("debug"));
    }

    #[test]
    fn test_second_subscriber_is_refused() {
        ensure_test_logging(None);
        assert!(init_logging("vmdb-test", &LogConfig::default()).is_err());
    }
}
