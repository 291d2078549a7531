// Application configuration, loaded from environment variables and CLI flags.

use std::path::PathBuf;

use thiserror::Error;

use crate::elo::DEFAULT_K;
use crate::scan::KeyMode;
use crate::stack::SelectorConfig;
use crate::tournament::SessionConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Keep ratings in memory only; nothing survives a restart.
    pub memory_store: bool,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Directory scanned for media files at startup.
    pub media_dir: PathBuf,
    pub key_mode: KeyMode,
    /// Elo K-factor.
    pub k: f64,
    pub pool_shrink: Option<u32>,
    pub session_length: Option<usize>,
    /// Offer to delete rating rows whose files are gone, then exit.
    pub prune: bool,
    /// Skip the prune confirmation prompt.
    pub assume_yes: bool,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:ratings.db?mode=rwc`)
    /// - `MEMORY_STORE` - `true` keeps ratings in memory
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `MEDIA_DIR` - directory to scan (default: `.`)
    /// - `KEY_MODE` - `path` or `hash` (default: `path`)
    /// - `ELO_K` - K-factor (default: 16)
    /// - `POOL_SHRINK` - pool shrink constant, `0` disables (default)
    /// - `SESSION_LENGTH` - matchups per stack build, `0` is unlimited (default)
    ///
    /// CLI flags override the environment: `--db`, `--memory`, `--port`,
    /// `--media`, `--key-mode`, `--k`, `--pool-shrink`, `--session-length`,
    /// `--prune`, `--yes`.
    pub fn load() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&args, |name| std::env::var(name).ok())
    }

    pub fn from_sources<F>(args: &[String], env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // CLI flag takes precedence, then env var
        let lookup = |flag: &str, var: &str| Self::parse_cli_value(args, flag).or_else(|| env(var));

        let database_url =
            lookup("--db", "DATABASE_URL").unwrap_or_else(|| "sqlite:ratings.db?mode=rwc".into());

        let memory_store = args.iter().any(|a| a == "--memory")
            || env("MEMORY_STORE")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false);

        let port = match lookup("--port", "PORT") {
            Some(v) => parse_number::<u16>("PORT", &v)?,
            None => 3000,
        };

        let media_dir = lookup("--media", "MEDIA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let key_mode = match lookup("--key-mode", "KEY_MODE") {
            Some(v) => v.parse::<KeyMode>().map_err(|reason| ConfigError::InvalidValue {
                name: "KEY_MODE",
                value: v.clone(),
                reason,
            })?,
            None => KeyMode::default(),
        };

        let k = match lookup("--k", "ELO_K") {
            Some(v) => {
                let k: f64 = parse_number("ELO_K", &v)?;
                if !(k.is_finite() && k > 0.0) {
                    return Err(ConfigError::InvalidValue {
                        name: "ELO_K",
                        value: v,
                        reason: "must be a positive number".into(),
                    });
                }
                k
            }
            None => DEFAULT_K,
        };

        // Zero disables both knobs.
        let pool_shrink = match lookup("--pool-shrink", "POOL_SHRINK") {
            Some(v) => Some(parse_number::<u32>("POOL_SHRINK", &v)?).filter(|&n| n > 0),
            None => None,
        };
        let session_length = match lookup("--session-length", "SESSION_LENGTH") {
            Some(v) => Some(parse_number::<usize>("SESSION_LENGTH", &v)?).filter(|&n| n > 0),
            None => None,
        };

        let prune = args.iter().any(|a| a == "--prune");
        let assume_yes = args.iter().any(|a| a == "--yes" || a == "-y");

        Ok(Config {
            database_url,
            memory_store,
            port,
            media_dir,
            key_mode,
            k,
            pool_shrink,
            session_length,
            prune,
            assume_yes,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            k: self.k,
            selector: SelectorConfig {
                pool_shrink: self.pool_shrink,
                session_length: self.session_length,
            },
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}

fn parse_number<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(args: &[&str], env: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let args: Vec<String> = std::iter::once("mediarank")
            .chain(args.iter().copied())
            .map(String::from)
            .collect();
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_sources(&args, |name| env.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[], &[]).unwrap();
        assert_eq!(config.database_url, "sqlite:ratings.db?mode=rwc");
        assert_eq!(config.port, 3000);
        assert_eq!(config.media_dir, PathBuf::from("."));
        assert_eq!(config.key_mode, KeyMode::Path);
        assert_eq!(config.k, 16.0);
        assert_eq!(config.pool_shrink, None);
        assert_eq!(config.session_length, None);
        assert!(!config.memory_store);
        assert!(!config.prune);
    }

    #[test]
    fn test_cli_overrides_env() {
        let config = load(
            &["--port", "8080", "--pool-shrink", "50", "--memory"],
            &[("PORT", "9000"), ("SESSION_LENGTH", "25"), ("KEY_MODE", "hash")],
        )
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.pool_shrink, Some(50));
        assert_eq!(config.session_length, Some(25));
        assert_eq!(config.key_mode, KeyMode::Hash);
        assert!(config.memory_store);

        let session = config.session_config();
        assert_eq!(session.selector.pool_shrink, Some(50));
        assert_eq!(session.k, 16.0);
    }

    #[test]
    fn test_zero_disables_shrink_and_cap() {
        let config = load(&["--pool-shrink", "0", "--session-length", "0"], &[]).unwrap();
        assert_eq!(config.pool_shrink, None);
        assert_eq!(config.session_length, None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(load(&["--port", "http"], &[]).is_err());
        assert!(load(&[], &[("POOL_SHRINK", "-3")]).is_err());
        assert!(load(&["--k", "0"], &[]).is_err());
        assert!(load(&["--key-mode", "inode"], &[]).is_err());
    }

    #[test]
    fn test_prune_flags() {
        let config = load(&["--prune", "--yes"], &[]).unwrap();
        assert!(config.prune);
        assert!(config.assume_yes);
    }
}
