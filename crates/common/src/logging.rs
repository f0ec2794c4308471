// EDB - Ethereum Debugger
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

//! Logging configuration for SlotLens components
//!
//! Provides centralized logging setup with:
//! - Colorful console output with structured formatting
//! - Daily rotated file logging
//! - Environment variable support (RUST_LOG)

use eyre::Result;
use std::{env, fs, path::PathBuf, sync::Once};
use tracing::Level;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::LocalTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::env::SLOTLENS_LOG_DIR;

/// Initialize logging for a SlotLens component
///
/// Sets up a pretty console layer and, optionally, a file layer rotated daily.
/// The default level is INFO unless `RUST_LOG` says otherwise.
///
/// # Arguments
/// * `component_name` - Name of the component (e.g., "slotlens")
/// * `enable_file_logging` - Whether to also write logs to disk
///
/// # Examples
/// ```rust,no_run
/// use slotlens_common::logging;
///
/// fn main() -> eyre::Result<()> {
///     logging::init_logging("slotlens", true)?;
///     tracing::info!("Application started");
///     Ok(())
/// }
/// ```
pub fn init_logging(component_name: &str, enable_file_logging: bool) -> Result<()> {
    let env_filter = default_filter("info")?;

    let console_layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_timer(LocalTime::rfc_3339())
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .pretty();

    if enable_file_logging {
        let log_dir = create_log_directory(component_name)?;

        let file_appender = rolling::daily(&log_dir, format!("{component_name}.log"));
        let (non_blocking_appender, guard) = non_blocking(file_appender);

        // The writer must outlive every log call in the process.
        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(LocalTime::rfc_3339())
            .with_ansi(false)
            .with_writer(non_blocking_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer.with_filter(filter_for_console()))
            .with(file_layer.with_filter(filter_for_file()))
            .try_init()
            .map_err(|e| eyre::eyre!("Failed to initialize tracing subscriber: {}", e))?;

        tracing::info!(
            component = component_name,
            log_dir = %log_dir.display(),
            "Logging initialized with console and file output"
        );
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
            .map_err(|e| eyre::eyre!("Failed to initialize tracing subscriber: {}", e))?;

        tracing::info!(component = component_name, "Logging initialized with console output only");
    }

    log_environment_info(component_name);

    Ok(())
}

/// `RUST_LOG` if set, otherwise the given level.
fn default_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| eyre::eyre!("Failed to create environment filter: {}", e))
}

/// Create the log directory, honouring [`SLOTLENS_LOG_DIR`]
fn create_log_directory(component_name: &str) -> Result<PathBuf> {
    let root = match env::var(SLOTLENS_LOG_DIR) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => env::temp_dir().join("slotlens-logs"),
    };
    let log_dir = root.join(component_name);

    fs::create_dir_all(&log_dir)?;

    Ok(log_dir)
}

/// Console output: keep transport crates quiet
fn filter_for_console() -> EnvFilter {
    let mut filter = EnvFilter::from_default_env();
    for directive in ["hyper=warn", "reqwest=warn", "alloy_transport_http=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// File output: everything `RUST_LOG` allows
fn filter_for_file() -> EnvFilter {
    EnvFilter::from_default_env()
}

fn log_environment_info(component_name: &str) {
    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let args: Vec<String> = env::args().collect();

    tracing::info!(
        component = component_name,
        rust_log = %rust_log,
        args = ?args,
        "Environment information"
    );

    if let Ok(current_dir) = env::current_dir() {
        tracing::debug!(working_directory = %current_dir.display(), "Working directory");
    }
}

/// Initialize simple logging (console only, compact)
///
/// # Arguments
/// * `level` - The default log level to use
pub fn init_simple_logging(level: Level) -> Result<()> {
    let env_filter = default_filter(level.as_str())?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to initialize simple logging: {}", e))?;

    Ok(())
}

static TEST_LOGGING_INIT: Once = Once::new();

/// Logging initialization for tests; safe to call from every test.
///
/// Console only. Defaults to INFO unless `RUST_LOG` is set.
///
/// # Usage
/// ```rust
/// use slotlens_common::logging;
///
/// logging::ensure_test_logging(None);
/// tracing::info!("safe in any test");
/// ```
pub fn ensure_test_logging(default_level: Option<Level>) {
    TEST_LOGGING_INIT.call_once(|| {
        // a subscriber may already be installed by the harness
        let _ = init_simple_logging(default_level.unwrap_or(Level::INFO));
    });
}
