use crate::actor::{ActorHostConfig, ActorSettings, FillLimits, MIN_PAGE_SIZE};
use crate::storage::MAX_BATCH_KEYS;
use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Process configuration for the `memrepro` server.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub host: String,
    pub port: u16,
    /// Root directory for file-backed namespaces. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub worker_slots: usize,
    pub page_size: usize,
    pub fill_cap: usize,
    pub batch_size: usize,
    pub idle_timeout: Option<Duration>,
    pub call_timeout: Option<Duration>,
    /// Reach actors on another host instead of the local one.
    pub actor_base_url: Option<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            data_dir: None,
            worker_slots: 4,
            page_size: 512,
            fill_cap: FillLimits::DEFAULT_MAX_INSERTS,
            batch_size: MAX_BATCH_KEYS,
            idle_timeout: None,
            call_timeout: None,
            actor_base_url: None,
        }
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset or blank values fall
    /// back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let config = Self {
            host: var("MEMREPRO_HOST").unwrap_or(defaults.host),
            port: parse_or(&var, "MEMREPRO_PORT", defaults.port)?,
            data_dir: var("MEMREPRO_DATA_DIR").map(PathBuf::from),
            worker_slots: parse_or(&var, "MEMREPRO_WORKER_SLOTS", defaults.worker_slots)?,
            page_size: parse_or(&var, "MEMREPRO_PAGE_SIZE", defaults.page_size)?,
            fill_cap: parse_or(&var, "MEMREPRO_FILL_CAP", defaults.fill_cap)?,
            batch_size: parse_or(&var, "MEMREPRO_BATCH_SIZE", defaults.batch_size)?,
            idle_timeout: parse_opt::<u64, _>(&var, "MEMREPRO_IDLE_TIMEOUT_SECS")?
                .map(Duration::from_secs),
            call_timeout: parse_opt::<u64, _>(&var, "MEMREPRO_CALL_TIMEOUT_MS")?
                .map(Duration::from_millis),
            actor_base_url: var("MEMREPRO_ACTOR_BASE_URL"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_slots == 0 {
            return Err(anyhow!("MEMREPRO_WORKER_SLOTS must be at least 1"));
        }
        if self.page_size < MIN_PAGE_SIZE {
            return Err(anyhow!("MEMREPRO_PAGE_SIZE must be at least {}", MIN_PAGE_SIZE));
        }
        if self.fill_cap == 0 {
            return Err(anyhow!("MEMREPRO_FILL_CAP must be at least 1"));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_KEYS {
            return Err(anyhow!(
                "MEMREPRO_BATCH_SIZE must be between 1 and {}",
                MAX_BATCH_KEYS
            ));
        }
        Ok(())
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn worker_slots(mut self, slots: usize) -> Self {
        self.worker_slots = slots;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn actor_settings(&self) -> ActorSettings {
        ActorSettings {
            page_size: self.page_size,
            fill: FillLimits::new(self.fill_cap, self.batch_size),
        }
    }

    pub fn host_config(&self) -> ActorHostConfig {
        ActorHostConfig::new()
            .worker_slots(self.worker_slots)
            .settings(self.actor_settings())
            .idle_timeout(self.idle_timeout)
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(var, key)?.unwrap_or(default))
}

fn parse_opt<T, F>(var: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{} must be a valid number, got '{}'", key, raw))
        })
        .transpose()
}
