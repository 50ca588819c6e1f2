use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub profiles: BTreeMap<String, Credentials>,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profiles: BTreeMap::new(),
            collector: CollectorConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Access credentials for one named profile.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_target_username")]
    pub target_username: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            task_timeout_secs: default_task_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            target_username: default_target_username(),
        }
    }
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_task_timeout_secs() -> u64 {
    DEFAULT_TASK_TIMEOUT_SECS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_target_username() -> String {
    "ec2-user".to_string()
}

impl Config {
    pub fn path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("fleetpulse").join("config.yaml"))
    }

    /// Look up the credentials stored under `profile`.
    pub fn resolve_credential(&self, profile: &str) -> Result<&Credentials, ConfigError> {
        self.profiles
            .get(profile)
            .ok_or_else(|| ConfigError::ProfileNotFound(profile.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collector.workers == 0 {
            return Err(ConfigError::Invalid(
                "collector.workers must be at least 1".into(),
            ));
        }
        if self.collector.task_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "collector.task_timeout_secs must be at least 1".into(),
            ));
        }
        if self.collector.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "collector.connect_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Load from the default location. A missing file yields defaults.
pub fn load() -> Result<Config, ConfigError> {
    load_from(&Config::path()?)
}

/// Defaults, then the YAML file, then `FLEETPULSE_*` environment variables.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Yaml::file(path))
        .merge(Env::prefixed("FLEETPULSE_").split("__"))
        .extract()
        .map_err(|e| ConfigError::Load(Box::new(e)))?;
    config.validate()?;
    Ok(config)
}

/// Insert or replace one profile, keeping everything else in the file.
pub fn save_profile(path: &Path, name: &str, credentials: Credentials) -> Result<(), ConfigError> {
    // Read the file alone so environment overrides are never persisted.
    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path).map_err(io_err(path))?;
        serde_yaml::from_str(&content)?
    } else {
        Config::default()
    };

    config.profiles.insert(name.to_string(), credentials);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let content = serde_yaml::to_string(&config)?;
    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, content).map_err(io_err(&tmp_path))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
            .map_err(io_err(&tmp_path))?;
    }

    std::fs::rename(&tmp_path, path).map_err(io_err(path))?;
    Ok(())
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ConfigError {
    let path = path.to_path_buf();
    move |source| ConfigError::Io { path, source }
}
