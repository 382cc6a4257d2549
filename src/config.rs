//! Configuration file loading.
//!
//! Optional TOML file at `$XDG_CONFIG_HOME/xr-vdisplay/config.toml`
//! (falling back to `$HOME/.config`). Every key has a default, so a missing
//! file or a partial file is fine; a malformed file is an error.
//!
//! ```toml
//! backend = "xr-manager"
//!
//! [xrandr]
//! program = "xrandr"
//! timeout_ms = 5000
//!
//! [modeline]
//! preferred_output = "VIRTUAL1"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::display::BackendKind;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Which backend to drive. Chosen explicitly; never guessed.
    pub backend: BackendKind,
    pub xrandr: XrandrConfig,
    pub xr_manager: XrManagerConfig,
    pub modeline: ModelineConfig,
    pub session_service: SessionServiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct XrandrConfig {
    /// Display-configuration tool binary.
    pub program: String,
    /// Deadline for a single tool invocation.
    pub timeout_ms: u64,
}

impl Default for XrandrConfig {
    fn default() -> Self {
        Self {
            program: "xrandr".into(),
            timeout_ms: 5000,
        }
    }
}

impl XrandrConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct XrManagerConfig {
    /// Output the driver exposes for the create/delete/mode properties.
    pub manager_output: String,
    /// Naming prefix of the virtual outputs the manager creates.
    pub output_prefix: String,
    /// Lowercase substrings that identify an XR headset in mode text.
    pub vendor_hints: Vec<String>,
}

impl Default for XrManagerConfig {
    fn default() -> Self {
        Self {
            manager_output: "XR-Manager".into(),
            output_prefix: "XR-".into(),
            vendor_hints: vec!["xreal".into(), "viture".into(), "nreal".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelineConfig {
    /// Modeline generator binary.
    pub generator: String,
    /// Output to host the mode on, when present. Otherwise the first
    /// output whose name contains `VIRTUAL` is used.
    pub preferred_output: Option<String>,
}

impl Default for ModelineConfig {
    fn default() -> Self {
        Self {
            generator: "cvt".into(),
            preferred_output: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionServiceConfig {
    pub bus_name: String,
    pub object_path: String,
    pub interface: String,
    /// Purpose tag passed with every create call.
    pub purpose: String,
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            bus_name: "com.xronlinux.BreezyDesktop.DisplayManager".into(),
            object_path: "/com/xronlinux/BreezyDesktop/DisplayManager".into(),
            interface: "com.xronlinux.BreezyDesktop.DisplayManager".into(),
            purpose: "xr-glasses".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Default config location.
///
/// Respects `$XDG_CONFIG_HOME`; falls back to `$HOME/.config`.
pub fn default_config_path() -> Option<PathBuf> {
    let config_dir = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(config_dir.join("xr-vdisplay").join("config.toml"))
}

/// Loads the configuration.
///
/// An explicit `path` must exist. The default path is optional: when it is
/// absent the defaults are used.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let (path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => match default_config_path() {
            Some(p) => (p, false),
            None => {
                log::debug!("config: no config directory, using defaults");
                return Ok(Config::default());
            }
        },
    };

    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("config: {} not found, using defaults", path.display());
            return Ok(Config::default());
        }
        Err(source) => return Err(ConfigError::Io { path, source }),
    };

    let config = parse_config(&text).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;
    log::info!("config: loaded {}", path.display());
    Ok(config)
}

/// Parses config text.
pub fn parse_config(text: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
