//! Shared configuration for the lektor service.
//!
//! All settings come from the process environment (optionally seeded from a
//! `.env` file via dotenvy). Durations accept either bare seconds (`1200`)
//! or humantime strings (`20m`). The portal session cookie is special: it
//! is re-read from the environment on every access so an operator can
//! rotate it without restarting the service.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

/// Environment variable holding the portal session cookie.
pub const USERNAME_COOKIE_VAR: &str = "USERNAME_COOKIE";

const DEFAULT_BASE_URL: &str = "https://www.tele-task.de/lecture/video/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value {value:?} for {name}: expected seconds or a humantime duration")]
    InvalidDuration { name: &'static str, value: String },

    #[error("invalid value {value:?} for {name}: expected a positive integer")]
    InvalidNumber { name: &'static str, value: String },
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

/// Full service configuration. Construct with [`Config::from_env`].
#[derive(Debug)]
pub struct Config {
    pub database: DatabaseConfig,
    /// Sleep between refresher cycles.
    pub refresh_period: Duration,
    /// Worker wait when every source queue is empty.
    pub worker_idle: Duration,
    /// Reaper timeout for in-flight guard entries.
    pub inflight_eviction: Duration,
    /// How many ids above the highest stored one the upper refresher probes.
    pub probe_window: u32,
    /// Scratch directory for downloaded/extracted media.
    pub recording_dir: PathBuf,
    /// Destination directory for VTT/TXT artifacts.
    pub artifact_dir: PathBuf,
    pub asr_model: String,
    pub compute_type: String,
    /// Portal base URL; a lecture page is `{base_url}{id}`.
    pub base_url: String,
    session_cookie: SessionCookie,
}

impl Config {
    /// Load from the process environment, seeding it from `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key→value source. `from_env` composes this
    /// over `std::env`; tests pass a map so they never touch process state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database = DatabaseConfig {
            name: require(&lookup, "POSTGRES_DB")?,
            user: require(&lookup, "POSTGRES_USER")?,
            password: require(&lookup, "POSTGRES_PASSWORD")?,
            host: require(&lookup, "DB_HOST")?,
            port: match lookup("DB_PORT") {
                Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                    ConfigError::InvalidNumber {
                        name: "DB_PORT",
                        value: raw,
                    }
                })?,
                None => 5432,
            },
        };

        Ok(Self {
            database,
            refresh_period: duration(&lookup, "REFRESH_PERIOD")?
                .unwrap_or(Duration::from_secs(1200)),
            worker_idle: duration(&lookup, "WORKER_IDLE")?
                .unwrap_or(Duration::from_secs(40)),
            inflight_eviction: duration(&lookup, "INFLIGHT_EVICTION")?
                .unwrap_or(Duration::from_secs(1200)),
            probe_window: number(&lookup, "UPPER_PROBE_WINDOW")?.unwrap_or(10),
            recording_dir: lookup("RECORDING_SOURCE_FOLDER")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("input")),
            artifact_dir: lookup("VTT_DEST_FOLDER")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("output")),
            asr_model: lookup("ASR_MODEL").unwrap_or_else(|| "turbo".into()),
            compute_type: lookup("COMPUTE_TYPE").unwrap_or_else(|| "int8".into()),
            base_url: lookup("LECTURE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            session_cookie: SessionCookie::default(),
        })
    }

    /// Current portal session cookie, re-read from the environment.
    pub fn session_cookie(&self) -> Option<String> {
        self.session_cookie.current()
    }
}

/// Hot-reloadable session credential.
///
/// The portal invalidates cookies on its own schedule; operators drop a new
/// value into the environment (or `.env`) and the very next request picks
/// it up.
#[derive(Debug, Default)]
struct SessionCookie {
    last: Mutex<Option<String>>,
}

impl SessionCookie {
    fn current(&self) -> Option<String> {
        dotenvy::dotenv().ok();
        let value = std::env::var(USERNAME_COOKIE_VAR).ok();
        let mut last = self.last.lock().expect("session cookie lock poisoned");
        if *last != value {
            if last.is_some() {
                info!("session cookie reloaded from environment");
            }
            *last = value.clone();
        }
        value
    }
}

fn require<F>(lookup: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingVar(name))
}

fn duration<F>(lookup: &F, name: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    if let Ok(secs) = raw.trim().parse::<u64>() {
        return Ok(Some(Duration::from_secs(secs)));
    }
    humantime::parse_duration(raw.trim())
        .map(Some)
        .map_err(|_| ConfigError::InvalidDuration { name, value: raw })
}

fn number<F>(lookup: &F, name: &'static str) -> Result<Option<u32>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u32>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidNumber { name, value: raw })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("POSTGRES_DB", "lektor"),
            ("POSTGRES_USER", "lektor"),
            ("POSTGRES_PASSWORD", "secret"),
            ("DB_HOST", "localhost"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.refresh_period, Duration::from_secs(1200));
        assert_eq!(config.worker_idle, Duration::from_secs(40));
        assert_eq!(config.inflight_eviction, Duration::from_secs(1200));
        assert_eq!(config.probe_window, 10);
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.asr_model, "turbo");
    }

    #[test]
    fn durations_accept_seconds_and_humantime() {
        let mut env = base_env();
        env.insert("REFRESH_PERIOD", "300");
        env.insert("WORKER_IDLE", "1m 30s");
        let config = load(&env).unwrap();
        assert_eq!(config.refresh_period, Duration::from_secs(300));
        assert_eq!(config.worker_idle, Duration::from_secs(90));
    }

    #[test]
    fn bad_duration_is_an_error() {
        let mut env = base_env();
        env.insert("INFLIGHT_EVICTION", "soon");
        assert!(matches!(
            load(&env),
            Err(ConfigError::InvalidDuration { name: "INFLIGHT_EVICTION", .. })
        ));
    }

    #[test]
    fn missing_database_var_is_an_error() {
        let mut env = base_env();
        env.remove("POSTGRES_DB");
        assert!(matches!(
            load(&env),
            Err(ConfigError::MissingVar("POSTGRES_DB"))
        ));
    }
}
