//! Runtime configuration loaded from an optional `key = value` file.
//!
//! The file lives at `$XDG_CONFIG_HOME/sourcekit/config.toml` (falling back to
//! `$HOME/.config/sourcekit/config.toml`). Every key is optional; CLI flags
//! override whatever the file sets.
//!
//! ```text
//! connect_timeout_secs = 10
//! read_timeout_secs = 30
//! operation_timeout_secs = 60   # whole-operation deadline
//! rate_limit_permits = 3        # 0 disables the limiter
//! rate_limit_window_ms = 1000
//! cookies_file = "/home/me/.local/share/sourcekit/cookies.txt"
//! user_agent = "sourcekit"
//! ```

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::ratelimit::RateBudget;
use crate::runtime::CallOptions;
use crate::transport::HttpTimeouts;

/// Errors raised while loading or validating a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A non-empty line without `=`.
    #[error("invalid config syntax on line {line}: expected key = value")]
    Syntax { line: usize },

    #[error("unknown configuration key '{key}' on line {line}")]
    UnknownKey { key: String, line: usize },

    /// The value does not parse as the key's type.
    #[error("invalid `{key}` value on line {line}: {reason}")]
    InvalidValue {
        key: String,
        line: usize,
        reason: String,
    },

    /// The value parses but falls outside the accepted range.
    #[error("invalid config value for `{key}`: {value}. Expected range: {range}")]
    OutOfRange {
        key: &'static str,
        value: u64,
        range: &'static str,
    },
}

impl ConfigError {
    fn invalid(key: &str, line: usize, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            line,
            reason: reason.into(),
        }
    }
}

/// Settings for the transport, limiter, session store and call deadlines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    /// Deadline for one whole operation, rate-limit waits included.
    pub operation_timeout_secs: Option<u64>,
    /// Permits per window for every origin without an adapter budget; 0 disables limiting.
    pub rate_limit_permits: Option<u32>,
    pub rate_limit_window_ms: Option<u64>,
    /// Netscape cookie file loaded at start and saved on exit.
    pub cookies_file: Option<PathBuf>,
    pub user_agent: Option<String>,
}

impl RuntimeConfig {
    /// Checks every set value against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("connect_timeout_secs", self.connect_timeout_secs, 1, 3600, "1..=3600")?;
        check_range("read_timeout_secs", self.read_timeout_secs, 1, 3600, "1..=3600")?;
        check_range("operation_timeout_secs", self.operation_timeout_secs, 1, 3600, "1..=3600")?;
        check_range(
            "rate_limit_permits",
            self.rate_limit_permits.map(u64::from),
            0,
            100,
            "0..=100",
        )?;
        check_range("rate_limit_window_ms", self.rate_limit_window_ms, 1, 60_000, "1..=60000")?;
        Ok(())
    }

    /// Applies every value set in `overrides` on top of `self`.
    #[must_use]
    pub fn merged_with(mut self, overrides: RuntimeConfig) -> Self {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if overrides.$field.is_some() {
                    self.$field = overrides.$field;
                })*
            };
        }
        take!(
            connect_timeout_secs,
            read_timeout_secs,
            operation_timeout_secs,
            rate_limit_permits,
            rate_limit_window_ms,
            cookies_file,
            user_agent
        );
        self
    }

    /// Transport timeouts, defaults where unset.
    #[must_use]
    pub fn http_timeouts(&self) -> HttpTimeouts {
        let defaults = HttpTimeouts::default();
        HttpTimeouts {
            connect: self
                .connect_timeout_secs
                .map_or(defaults.connect, Duration::from_secs),
            read: self.read_timeout_secs.map_or(defaults.read, Duration::from_secs),
        }
    }

    /// Default limiter budget; `None` when limiting is disabled.
    #[must_use]
    pub fn rate_budget(&self) -> Option<RateBudget> {
        let defaults = RateBudget::default();
        let permits = self.rate_limit_permits.unwrap_or(defaults.permits());
        if permits == 0 {
            return None;
        }
        let window = self
            .rate_limit_window_ms
            .map_or(defaults.window(), Duration::from_millis);
        Some(RateBudget::new(permits, window))
    }

    #[must_use]
    pub fn call_options(&self) -> CallOptions {
        CallOptions {
            timeout: self.operation_timeout_secs.map(Duration::from_secs),
        }
    }
}

fn check_range(
    key: &'static str,
    value: Option<u64>,
    min: u64,
    max: u64,
    range: &'static str,
) -> Result<(), ConfigError> {
    match value {
        Some(value) if !(min..=max).contains(&value) => Err(ConfigError::OutOfRange { key, value, range }),
        _ => Ok(()),
    }
}

/// A config file lookup result.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path, if a base directory is known.
    pub path: Option<PathBuf>,
    pub config: RuntimeConfig,
    pub loaded_from_file: bool,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/sourcekit/config.toml`
/// 2. `$HOME/.config/sourcekit/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("sourcekit").join("config.toml"));
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("sourcekit")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file at `path`, or at the default path when `None`.
/// A missing file yields the default config.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file exists but cannot be read, parsed
/// or validated.
pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let path = path.map(Path::to_path_buf).or_else(resolve_default_config_path);
    let Some(path_ref) = path.as_deref().filter(|p| p.exists()) else {
        return Ok(LoadedConfig {
            path,
            config: RuntimeConfig::default(),
            loaded_from_file: false,
        });
    };

    let raw = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    let config = parse_config_str(&raw)?;
    Ok(LoadedConfig {
        path,
        config,
        loaded_from_file: true,
    })
}

/// Parses config text and validates it.
///
/// # Errors
///
/// Returns [`ConfigError`] on syntax errors, unknown keys, bad values or
/// out-of-range values.
pub fn parse_config_str(raw: &str) -> Result<RuntimeConfig, ConfigError> {
    let mut cfg = RuntimeConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let Some((raw_key, raw_value)) = line.split_once('=') else {
            return Err(ConfigError::Syntax { line: line_no });
        };
        let key = raw_key.trim();
        let value = raw_value.trim();

        match key {
            "connect_timeout_secs" => cfg.connect_timeout_secs = Some(parse_u64(key, line_no, value)?),
            "read_timeout_secs" => cfg.read_timeout_secs = Some(parse_u64(key, line_no, value)?),
            "operation_timeout_secs" => {
                cfg.operation_timeout_secs = Some(parse_u64(key, line_no, value)?);
            }
            "rate_limit_permits" => {
                let parsed = parse_u64(key, line_no, value)?;
                let permits = u32::try_from(parsed)
                    .map_err(|_| ConfigError::invalid(key, line_no, "out of range for u32"))?;
                cfg.rate_limit_permits = Some(permits);
            }
            "rate_limit_window_ms" => cfg.rate_limit_window_ms = Some(parse_u64(key, line_no, value)?),
            "cookies_file" => {
                cfg.cookies_file = Some(PathBuf::from(parse_string_literal(key, line_no, value)?));
            }
            "user_agent" => cfg.user_agent = Some(parse_string_literal(key, line_no, value)?),
            unknown => {
                return Err(ConfigError::UnknownKey {
                    key: unknown.to_string(),
                    line: line_no,
                });
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(key: &str, line: usize, raw_value: &str) -> Result<String, ConfigError> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        return Err(ConfigError::invalid(key, line, "expected double-quoted string"));
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_u64(key: &str, line: usize, raw_value: &str) -> Result<u64, ConfigError> {
    let token = raw_value.trim();
    if token.is_empty() {
        return Err(ConfigError::invalid(key, line, "expected integer value"));
    }
    token
        .parse::<u64>()
        .map_err(|e| ConfigError::invalid(key, line, e.to_string()))
}
