use crate::error::ConfigError;
use crate::escalation::CountdownDuration;
use crate::logic::Thresholds;
use chrono::Utc;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings, read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub countdown: CountdownDuration,
    pub cooldown: Duration,
    pub tick: Duration,
    pub flag_dir: PathBuf,
    pub thresholds: Thresholds,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8080,
            database_url: None,
            countdown: CountdownDuration::default(),
            cooldown: Duration::ZERO,
            tick: Duration::from_secs(1),
            flag_dir: PathBuf::from("./flags"),
            thresholds: Thresholds::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(port) = parse(&lookup, "PORT")? {
            config.port = port;
        }
        config.database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        if let Some(secs) = parse::<i64, _>(&lookup, "COUNTDOWN_SECS")? {
            config.countdown = CountdownDuration::new(secs).map_err(|_| ConfigError::Invalid {
                key: "COUNTDOWN_SECS",
                value: secs.to_string(),
            })?;
        }
        if let Some(secs) = parse::<u64, _>(&lookup, "COOLDOWN_SECS")? {
            let cooldown = Duration::from_secs(secs);
            // Must stay representable as a deadline on the wall clock
            let representable = chrono::Duration::from_std(cooldown)
                .ok()
                .and_then(|d| Utc::now().checked_add_signed(d))
                .is_some();
            if !representable {
                return Err(ConfigError::Invalid {
                    key: "COOLDOWN_SECS",
                    value: secs.to_string(),
                });
            }
            config.cooldown = cooldown;
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "TICK_MS")? {
            if ms == 0 {
                return Err(ConfigError::Invalid {
                    key: "TICK_MS",
                    value: ms.to_string(),
                });
            }
            config.tick = Duration::from_millis(ms);
        }
        if let Some(dir) = lookup("FLAG_DIR") {
            config.flag_dir = PathBuf::from(dir);
        }

        if let Some(v) = parse(&lookup, "HIGH_ACCEL_THRESHOLD")? {
            config.thresholds.high_accel = v;
        }
        if let Some(v) = parse(&lookup, "MEDIUM_ACCEL_THRESHOLD")? {
            config.thresholds.medium_accel = v;
        }
        if let Some(v) = parse(&lookup, "ROLLOVER_GYRO_THRESHOLD")? {
            config.thresholds.rollover_gyro = v;
        }

        Ok(config)
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
