//! Host configuration, read from a TOML file.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields the stock device configuration.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::diagnostics::{HostError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub runtime: RuntimeConfig,
    pub shell: ShellConfig,
    pub boot: BootConfig,
    pub devices: DeviceConfig,
}

impl HostConfig {
    /// Loads configuration from `path`, or returns defaults when no path is
    /// given. A path that is given but missing is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let contents = fs::read_to_string(path)?;
                Self::from_toml(&contents)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| HostError::Config(err.to_string()))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on engine heap usage in bytes. `None` means unlimited.
    pub memory_limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockDetection {
    /// Ask the engine whether the accumulated input is a complete chunk.
    #[default]
    Probe,
    /// Scan for block keywords.
    Keywords,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub prompt: String,
    pub continuation_prompt: String,
    pub banner: bool,
    /// Echo typed characters back to the console (raw UART consoles).
    pub echo: bool,
    /// Stop the shell when input reaches end-of-stream instead of waiting.
    pub exit_on_eof: bool,
    pub idle_poll_ms: u64,
    pub line_capacity: usize,
    pub buffer_capacity: usize,
    pub block_detection: BlockDetection,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt: "> ".to_string(),
            continuation_prompt: ">> ".to_string(),
            banner: true,
            echo: false,
            exit_on_eof: false,
            idle_poll_ms: 10,
            line_capacity: 256,
            buffer_capacity: 1024,
            block_detection: BlockDetection::Probe,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    /// Module required once all modules are installed.
    pub entry: Option<String>,
    /// Source executed after the entry module, e.g. `app.run()`.
    pub after_entry: Option<String>,
    /// Directory of additional `*.lua` modules installed after the embedded ones.
    pub module_dir: Option<PathBuf>,
    /// Compile modules on first `require` instead of at boot.
    pub lazy_modules: bool,
    /// Drop into the shell after the entry script finishes.
    pub shell: bool,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            entry: Some("main".to_string()),
            after_entry: None,
            module_dir: None,
            lazy_modules: false,
            shell: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Number of two-wire bus ports the board exposes.
    pub i2c_ports: u8,
    pub http_timeout_ms: u64,
    pub http_max_response_bytes: usize,
    pub http_user_agent: String,
    pub wifi_timeout_ms: u64,
    /// Networks the simulated station can join, as `ssid -> password`.
    pub networks: Vec<NetworkEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkEntry {
    pub ssid: String,
    pub password: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            i2c_ports: 2,
            http_timeout_ms: 10_000,
            http_max_response_bytes: 16 * 1024,
            http_user_agent: "MoonshotDashboard/1.0".to_string(),
            wifi_timeout_ms: 15_000,
            networks: Vec::new(),
        }
    }
}
