//! CLI argument definitions for the Folio server.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Folio - workspace agent, planning cascade, and pattern engine.
#[derive(Parser, Debug)]
#[command(name = "folio", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data directory for the SQLite database and API token.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > FOLIO_CONFIG env var > ~/.folio/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        self.resolve_config_path_from(|key| std::env::var(key).ok())
    }

    fn resolve_config_path_from<F>(&self, lookup: F) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Some(p) = lookup("FOLIO_CONFIG").filter(|p| !p.trim().is_empty()) {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Port override from the command line. `FOLIO_PORT` is folded in by
    /// the config's environment pass, so only the flag is handled here.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        self.port.unwrap_or(config_port)
    }

    /// Data directory override, or `None` to use the config value.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE").ok();
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME").ok();
    home.map(PathBuf::from)
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".folio").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        Some(rest) => home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("folio").chain(list.iter().copied()))
    }

    #[test]
    fn test_flag_beats_env_for_config_path() {
        let cli = args(&["--config", "/tmp/a.toml"]);
        let path = cli.resolve_config_path_from(|_| Some("/tmp/b.toml".to_string()));
        assert_eq!(path, PathBuf::from("/tmp/a.toml"));
    }

    #[test]
    fn test_env_config_path_used_without_flag() {
        let cli = args(&[]);
        let path = cli.resolve_config_path_from(|k| {
            (k == "FOLIO_CONFIG").then(|| "/tmp/b.toml".to_string())
        });
        assert_eq!(path, PathBuf::from("/tmp/b.toml"));
    }

    #[test]
    fn test_port_and_overrides() {
        let cli = args(&["-p", "9000", "-d", "/srv/folio", "-l", "debug"]);
        assert_eq!(cli.resolve_port(7420), 9000);
        assert_eq!(cli.resolve_data_dir().as_deref(), Some("/srv/folio"));
        assert_eq!(cli.resolve_log_level().as_deref(), Some("debug"));
        assert_eq!(args(&[]).resolve_port(7420), 7420);
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/var/folio"), PathBuf::from("/var/folio"));
        assert!(!expand_home("~/data").to_string_lossy().starts_with('~'));
    }
}
