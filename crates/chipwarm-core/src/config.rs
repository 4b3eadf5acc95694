use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ChipwarmError, Result};

/// Top-level configuration for the chipwarm service.
///
/// Loaded from `~/.chipwarm/config.toml` by default. Every section falls
/// back to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChipwarmConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl ChipwarmConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ChipwarmConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let sim = &self.simulation;
        if sim.min_interval_ms == 0 {
            return Err(ChipwarmError::Config(
                "simulation.min_interval_ms must be greater than zero".to_string(),
            ));
        }
        if sim.min_interval_ms > sim.max_interval_ms {
            return Err(ChipwarmError::Config(format!(
                "simulation.min_interval_ms ({}) exceeds max_interval_ms ({})",
                sim.min_interval_ms, sim.max_interval_ms
            )));
        }
        if sim.identity_failure_limit == 0 {
            return Err(ChipwarmError::Config(
                "simulation.identity_failure_limit must be at least 1".to_string(),
            ));
        }
        if sim.contacts.is_empty() || sim.outbound_messages.is_empty() || sim.reply_messages.is_empty() {
            return Err(ChipwarmError::Config(
                "simulation contact and message pools must not be empty".to_string(),
            ));
        }
        if self.session.connect_timeout_secs == 0 || self.session.pairing_timeout_secs == 0 {
            return Err(ChipwarmError::Config(
                "session connect and pairing timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// API server port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.chipwarm/data".to_string(),
            log_level: "info".to_string(),
            port: 3040,
        }
    }
}

/// Which transport implementation backs the gateway.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// In-process transport that pairs after a fixed delay and accepts every send.
    #[default]
    Loopback,
}

/// Transport session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on how long `connect` waits for a pairing artifact or CONNECTED.
    pub connect_timeout_secs: u64,
    /// How long an issued pairing artifact stays scannable.
    pub pairing_timeout_secs: u64,
    /// Transport implementation.
    pub transport: TransportKind,
    /// Loopback only: delay between the pairing artifact and CONNECTED.
    pub loopback_pairing_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 60,
            pairing_timeout_secs: 120,
            transport: TransportKind::Loopback,
            loopback_pairing_delay_ms: 5_000,
        }
    }
}

/// Simulation scheduler settings and message pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Lower bound of the per-tick delay.
    pub min_interval_ms: u64,
    /// Upper bound of the per-tick delay (inclusive).
    pub max_interval_ms: u64,
    /// Consecutive bot-address failures that cancel a timer.
    pub identity_failure_limit: u32,
    /// Addresses the bot converses with.
    pub contacts: Vec<String>,
    /// Templates sent bot -> contact.
    pub outbound_messages: Vec<String>,
    /// Templates sent contact -> bot.
    pub reply_messages: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 3_000,
            max_interval_ms: 8_000,
            identity_failure_limit: 2,
            contacts: vec!["5544999538643@c.us".to_string()],
            outbound_messages: vec![
                "Olá!".to_string(),
                "Tudo bem?".to_string(),
                "Como vai você?".to_string(),
                "Que legal!".to_string(),
                "Entendi.".to_string(),
            ],
            reply_messages: vec![
                "Sim".to_string(),
                "Não".to_string(),
                "Tudo ótimo".to_string(),
                "Obrigado".to_string(),
            ],
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Requests per second accepted on authenticated routes.
    pub rate_limit_per_sec: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_sec: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = ChipwarmConfig::default();
        assert_eq!(config.general.data_dir, "~/.chipwarm/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.port, 3040);
        assert_eq!(config.session.connect_timeout_secs, 60);
        assert_eq!(config.session.transport, TransportKind::Loopback);
        assert_eq!(config.simulation.min_interval_ms, 3_000);
        assert_eq!(config.simulation.max_interval_ms, 8_000);
        assert_eq!(config.simulation.identity_failure_limit, 2);
        assert_eq!(config.api.rate_limit_per_sec, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/custom/data"
log_level = "debug"
port = 8080

[session]
connect_timeout_secs = 15
pairing_timeout_secs = 90
transport = "loopback"
loopback_pairing_delay_ms = 100

[simulation]
min_interval_ms = 500
max_interval_ms = 900
identity_failure_limit = 3
contacts = ["111@c.us", "222@c.us"]
outbound_messages = ["hi"]
reply_messages = ["hey"]
"#;
        let file = create_temp_config(content);
        let config = ChipwarmConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/custom/data");
        assert_eq!(config.general.port, 8080);
        assert_eq!(config.session.connect_timeout_secs, 15);
        assert_eq!(config.session.pairing_timeout_secs, 90);
        assert_eq!(config.simulation.contacts.len(), 2);
        assert_eq!(config.simulation.identity_failure_limit, 3);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[general]
log_level = "warn"
"#;
        let file = create_temp_config(content);
        let config = ChipwarmConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.simulation.min_interval_ms, 3_000);
        assert_eq!(config.api.rate_limit_per_sec, 100);
    }

    #[test]
    fn test_load_rejects_inverted_interval() {
        let content = r#"
[simulation]
min_interval_ms = 9000
max_interval_ms = 1000
"#;
        let file = create_temp_config(content);
        let err = ChipwarmConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ChipwarmError::Config(_)));
        assert!(err.to_string().contains("min_interval_ms"));
    }

    #[test]
    fn test_validate_rejects_empty_pools() {
        let mut config = ChipwarmConfig::default();
        config.simulation.contacts.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_failure_limit() {
        let mut config = ChipwarmConfig::default();
        config.simulation.identity_failure_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_connect_timeout() {
        let mut config = ChipwarmConfig::default();
        config.session.connect_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ChipwarmConfig::default();
        config.session.pairing_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = ChipwarmConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.chipwarm/data");
    }

    #[test]
    fn test_load_or_default_invalid_toml() {
        let file = create_temp_config("this is not [valid toml");
        let config = ChipwarmConfig::load_or_default(file.path());
        assert_eq!(config.general.port, 3040);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ChipwarmConfig::default();
        config.simulation.contacts = vec!["999@c.us".to_string()];
        config.save(&path).unwrap();

        let reloaded = ChipwarmConfig::load(&path).unwrap();
        assert_eq!(reloaded.simulation.contacts, vec!["999@c.us".to_string()]);
        assert_eq!(reloaded.general.port, config.general.port);
    }
}
