//! CLI argument definitions for the chipwarm binary.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 3040;

/// chipwarm - keeps messaging-network chips active with simulated traffic.
#[derive(Parser, Debug)]
#[command(name = "chipwarm", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data directory for the SQLite database.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,
}

impl CliArgs {
    /// Priority: --config flag > CHIPWARM_CONFIG env var > ~/.chipwarm/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        config_path_from(
            self.config.clone(),
            std::env::var("CHIPWARM_CONFIG").ok(),
            std::env::var("HOME").ok(),
        )
    }

    /// Priority: --port flag > CHIPWARM_PORT env var > config file value > 3040.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        port_from(self.port, std::env::var("CHIPWARM_PORT").ok(), config_port)
    }

    /// --data-dir flag, if given.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// --log-level flag, if given.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

fn config_path_from(flag: Option<PathBuf>, env: Option<String>, home: Option<String>) -> PathBuf {
    if let Some(p) = flag {
        return p;
    }
    if let Some(p) = env.filter(|p| !p.is_empty()) {
        return PathBuf::from(p);
    }
    match home {
        Some(home) => PathBuf::from(home).join(".chipwarm").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}

fn port_from(flag: Option<u16>, env: Option<String>, config_port: u16) -> u16 {
    if let Some(p) = flag {
        return p;
    }
    if let Some(p) = env.and_then(|val| val.parse::<u16>().ok()) {
        return p;
    }
    if config_port != 0 {
        return config_port;
    }
    DEFAULT_PORT
}

/// Expand a leading `~/` against `home`.
pub fn expand_home(path: &str, home: Option<&str>) -> PathBuf {
    match (path.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        (Some(rest), None) => PathBuf::from(".").join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_precedence() {
        let flag = Some(PathBuf::from("/etc/chipwarm.toml"));
        assert_eq!(
            config_path_from(flag, Some("/env.toml".into()), Some("/home/ana".into())),
            PathBuf::from("/etc/chipwarm.toml")
        );
        assert_eq!(
            config_path_from(None, Some("/env.toml".into()), Some("/home/ana".into())),
            PathBuf::from("/env.toml")
        );
        assert_eq!(
            config_path_from(None, None, Some("/home/ana".into())),
            PathBuf::from("/home/ana/.chipwarm/config.toml")
        );
    }

    #[test]
    fn test_port_precedence() {
        assert_eq!(port_from(Some(8000), Some("9000".into()), 7000), 8000);
        assert_eq!(port_from(None, Some("9000".into()), 7000), 9000);
        assert_eq!(port_from(None, Some("not-a-port".into()), 7000), 7000);
        assert_eq!(port_from(None, None, 0), DEFAULT_PORT);
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(
            expand_home("~/.chipwarm/data", Some("/home/ana")),
            PathBuf::from("/home/ana/.chipwarm/data")
        );
        assert_eq!(expand_home("/var/lib/chipwarm", Some("/home/ana")), PathBuf::from("/var/lib/chipwarm"));
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from(["chipwarm", "--port", "4000", "-l", "debug"]);
        assert_eq!(args.port, Some(4000));
        assert_eq!(args.resolve_log_level().as_deref(), Some("debug"));
        assert!(args.config.is_none());
    }
}
