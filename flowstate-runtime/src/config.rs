//! Machine configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via FLOWSTATE_CONFIG)
//! 3. Environment variables

use flowstate_core::KeyMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What the machine does with an event that has no registered transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedPolicy {
    /// Return `NoTransitionRegistered` to the caller of `on_event`.
    #[default]
    Reject,
    /// Move to the error state built by the machine's error-state factory.
    ErrorState,
}

impl UnmatchedPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnmatchedPolicy::Reject => "reject",
            UnmatchedPolicy::ErrorState => "error_state",
        }
    }
}

impl std::str::FromStr for UnmatchedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reject" | "raise" => Ok(UnmatchedPolicy::Reject),
            "error_state" | "error-state" => Ok(UnmatchedPolicy::ErrorState),
            other => Err(format!("unknown unmatched-event policy '{}'", other)),
        }
    }
}

/// State machine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Which shapes make up a registry key.
    pub key_mode: KeyMode,
    /// Handling of events without a registered transition.
    pub unmatched: UnmatchedPolicy,
    /// Buffered states per subscriber before it starts lagging.
    pub state_channel_capacity: usize,
    /// Buffered side effects per subscriber before it starts lagging.
    pub side_effect_channel_capacity: usize,
    /// Buffered failure reports per subscriber.
    pub failure_channel_capacity: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            key_mode: KeyMode::StateAndEvent,
            unmatched: UnmatchedPolicy::Reject,
            state_channel_capacity: 64,
            side_effect_channel_capacity: 64,
            failure_channel_capacity: 32,
        }
    }
}

impl MachineConfig {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("FLOWSTATE_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: MachineConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides from any variable source. Unparseable values are
    /// ignored with a warning.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(mode) = lookup("FLOWSTATE_KEY_MODE") {
            match mode.parse() {
                Ok(parsed) => self.key_mode = parsed,
                Err(e) => tracing::warn!("ignoring FLOWSTATE_KEY_MODE: {}", e),
            }
        }

        if let Some(policy) = lookup("FLOWSTATE_UNMATCHED") {
            match policy.parse() {
                Ok(parsed) => self.unmatched = parsed,
                Err(e) => tracing::warn!("ignoring FLOWSTATE_UNMATCHED: {}", e),
            }
        }

        if let Some(cap) = lookup("FLOWSTATE_STATE_CAPACITY") {
            if let Ok(n) = cap.parse() {
                self.state_channel_capacity = n;
            }
        }

        if let Some(cap) = lookup("FLOWSTATE_SIDE_EFFECT_CAPACITY") {
            if let Ok(n) = cap.parse() {
                self.side_effect_channel_capacity = n;
            }
        }

        if let Some(cap) = lookup("FLOWSTATE_FAILURE_CAPACITY") {
            if let Ok(n) = cap.parse() {
                self.failure_channel_capacity = n;
            }
        }
    }

    /// Checks that every channel can hold at least one item.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacities = [
            ("state_channel_capacity", self.state_channel_capacity),
            ("side_effect_channel_capacity", self.side_effect_channel_capacity),
            ("failure_channel_capacity", self.failure_channel_capacity),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn with_key_mode(mut self, key_mode: KeyMode) -> Self {
        self.key_mode = key_mode;
        self
    }

    pub fn with_unmatched(mut self, unmatched: UnmatchedPolicy) -> Self {
        self.unmatched = unmatched;
        self
    }

    /// Sets the state and side-effect channel capacities.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.state_channel_capacity = capacity;
        self.side_effect_channel_capacity = capacity;
        self
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
