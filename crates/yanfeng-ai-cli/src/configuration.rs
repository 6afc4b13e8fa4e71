use crate::error::{to_env_var, ConfigError, ENV_PREFIX};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use yanfeng_ai::providers::configs::{
    EntitySettings, ModelScopeConfig, DEFAULT_TIMEOUT_SECS, MODELSCOPE_HOST, TASK_MAX_WAIT_SECS,
    TASK_POLL_INTERVAL_SECS,
};

#[derive(Debug, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub api_key: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
}

impl ProviderSettings {
    pub fn into_config(self) -> ModelScopeConfig {
        let mut config = ModelScopeConfig::new(self.api_key)
            .with_host(self.host)
            .with_polling(
                Duration::from_secs(self.poll_interval_secs),
                Duration::from_secs(self.max_wait_secs),
            );
        config.timeout = Duration::from_secs(self.timeout_secs);
        config
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub provider: ProviderSettings,
    #[serde(default)]
    pub entity: EntitySettings,
}

impl Settings {
    /// Load defaults, then the TOML file, then `YANFENG_` environment variables.
    ///
    /// Without an explicit file the user config directory is tried and may be absent.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("provider.host", default_host())?
            .set_default("provider.timeout_secs", default_timeout())?
            .set_default("provider.poll_interval_secs", default_poll_interval())?
            .set_default("provider.max_wait_secs", default_max_wait())?;

        match config_file {
            Some(path) => {
                builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
            }
            None => {
                if let Some(path) = default_config_path() {
                    builder = builder
                        .add_source(File::from(path).format(FileFormat::Toml).required(false));
                }
            }
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Self = match config.try_deserialize() {
            Ok(settings) => settings,
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                if let Some(key) = missing_field_key(&err.to_string()) {
                    return Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&key),
                    });
                } else if let config::ConfigError::NotFound(key) = &err {
                    return Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(key),
                    });
                }
                return Err(ConfigError::Other(err));
            }
        };

        if settings.provider.api_key.trim().is_empty() {
            return Err(ConfigError::MissingEnvVar {
                env_var: to_env_var("provider.api_key"),
            });
        }
        settings
            .entity
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(settings)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("yanfeng").join("config.toml"))
}

/// Dotted key of a "missing field" deserialization error.
///
/// A missing `provider` section means the API key was never given.
fn missing_field_key(message: &str) -> Option<String> {
    let field = message
        .split("missing field `")
        .nth(1)?
        .split('`')
        .next()?;
    let parent = message
        .split("for key `")
        .nth(1)
        .and_then(|rest| rest.split('`').next())
        .filter(|parent| !parent.is_empty());

    Some(match (parent, field) {
        (Some(parent), field) => format!("{}.{}", parent, field),
        (None, "provider") | (None, "api_key") => "provider.api_key".to_string(),
        (None, field) => field.to_string(),
    })
}

fn default_host() -> String {
    MODELSCOPE_HOST.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_poll_interval() -> u64 {
    TASK_POLL_INTERVAL_SECS
}

fn default_max_wait() -> u64 {
    TASK_MAX_WAIT_SECS
}
