//! Session tunables and saved line profiles

use crate::core::error::{SerialError, SerialResult};
use crate::core::settings::LineSettings;
use crate::core::timer::DEFAULT_LIVENESS_INTERVAL;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables of a session that are not part of the line itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Interval between liveness probes (milliseconds)
    pub liveness_interval_ms: u64,
    /// Buffered bytes above which a warning is logged
    pub receive_high_water: usize,
    /// Number of state transitions kept in the history
    pub history_limit: usize,
    /// Read timeout of the native reader thread (milliseconds)
    pub read_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            liveness_interval_ms: u64::try_from(DEFAULT_LIVENESS_INTERVAL.as_millis()).unwrap_or(500),
            receive_high_water: 1024 * 1024,
            history_limit: 100,
            read_timeout_ms: 50,
        }
    }
}

impl SessionConfig {
    /// Interval between liveness probes
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms.max(1))
    }

    /// Read timeout of the native reader thread
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    /// Set the liveness interval
    #[must_use]
    pub fn liveness_interval_ms(mut self, ms: u64) -> Self {
        self.liveness_interval_ms = ms;
        self
    }
}

/// Named line settings plus session tunables, stored as TOML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Profile name
    pub name: String,
    /// Line settings
    pub line: LineSettings,
    /// Session tunables
    #[serde(default)]
    pub session: SessionConfig,
}

impl Profile {
    /// Create a profile with default session tunables
    pub fn new(name: &str, line: LineSettings) -> Self {
        Self {
            name: name.to_string(),
            line,
            session: SessionConfig::default(),
        }
    }

    /// Parse from TOML
    pub fn from_toml_str(content: &str) -> SerialResult<Self> {
        let profile: Self = toml::from_str(content).map_err(|e| SerialError::Config(e.to_string()))?;
        profile.line.validate()?;
        Ok(profile)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> SerialResult<String> {
        toml::to_string_pretty(self).map_err(|e| SerialError::Config(e.to_string()))
    }

    /// Load from file
    pub fn load(path: &Path) -> SerialResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Save to file, creating parent directories
    pub fn save(&self, path: &Path) -> SerialResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::settings::FlowControlMode;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles").join("rs485.toml");

        let line = LineSettings::new("/dev/ttyUSB0", 9600)
            .flow_control(FlowControlMode::Rs485)
            .parity_replacement(Some(b'?'))
            .auto_reopen(Duration::from_secs(2));
        let profile = Profile::new("rs485", line);
        profile.save(&path).unwrap();

        assert_eq!(Profile::load(&path).unwrap(), profile);
    }

    #[test]
    fn test_minimal_profile() {
        let profile = Profile::from_toml_str(
            "name = \"bench\"\n[line]\nport = \"COM4\"\nbaud_rate = 115200\nflow_control = \"rs485\"\n",
        )
        .unwrap();
        assert_eq!(profile.line.flow_control, FlowControlMode::Rs485);
        assert_eq!(profile.session, SessionConfig::default());
        assert_eq!(profile.session.liveness_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_profile_rejected() {
        let err = Profile::from_toml_str("name = \"x\"\n[line]\nport = \"COM4\"\nbaud_rate = 0\n").unwrap_err();
        assert!(matches!(err, SerialError::InvalidSettings(_)));
        assert!(matches!(Profile::from_toml_str("not toml ["), Err(SerialError::Config(_))));
    }
}
