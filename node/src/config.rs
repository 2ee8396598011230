use anyhow::{Context, Result};
use config::{Config, Environment, File as ConfigFile};
use std::path::PathBuf;
use std::str::FromStr;

/// Looked up when `--config` is not given; silently skipped if absent.
pub const DEFAULT_CONFIG_PATH: &str = "config/exovision.toml";

const ENV_PREFIX: &str = "EXOVISION";
const LOG_FORMATS: [&str; 2] = ["pretty", "json"];

/// Node configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub config_path: Option<PathBuf>,

    // HTTP
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,

    // Model
    pub model_path: PathBuf,
    pub max_batch_size: usize,
    pub inference_timeout_ms: u64,

    // Logging
    pub log_level: String,
    pub log_format: String,

    // Observability
    pub prometheus_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 10 * 1024 * 1024,
            model_path: PathBuf::from("models/baseline.json"),
            max_batch_size: exovision_ai_core::MAX_BATCH_SIZE,
            inference_timeout_ms: 5_000,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            prometheus_enabled: true,
        }
    }
}

impl AppConfig {
    /// Read the TOML file (explicit or default) and `EXOVISION_*` variables.
    pub fn load(config_path_override: Option<&str>) -> Result<Self> {
        let resolved_path = if let Some(path) = config_path_override {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path)
        } else {
            Some(PathBuf::from(DEFAULT_CONFIG_PATH)).filter(|path| path.exists())
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX));

        let config = builder.build().context("failed to assemble configuration")?;
        Self::from_config(&config, resolved_path)
    }

    /// Resolve every key from an assembled source stack.
    ///
    /// Flat keys (`port`, as produced by `EXOVISION_PORT`) win over their
    /// sectioned TOML spelling (`server.port`).
    pub fn from_config(config: &Config, config_path: Option<PathBuf>) -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            config_path,
            host: get_string_value(config, &["host", "server.host"]).unwrap_or(defaults.host),
            port: get_parsed_value(config, &["port", "server.port"], defaults.port)?,
            max_upload_bytes: get_parsed_value(
                config,
                &["max_upload_bytes", "server.max_upload_bytes"],
                defaults.max_upload_bytes,
            )?,
            model_path: get_string_value(config, &["model_path", "model.path"])
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            max_batch_size: get_parsed_value(
                config,
                &["max_batch_size", "model.max_batch_size"],
                defaults.max_batch_size,
            )?,
            inference_timeout_ms: get_parsed_value(
                config,
                &["inference_timeout_ms", "model.inference_timeout_ms"],
                defaults.inference_timeout_ms,
            )?,
            log_level: get_string_value(config, &["log_level", "logging.level"])
                .unwrap_or(defaults.log_level),
            log_format: get_string_value(config, &["log_format", "logging.format"])
                .unwrap_or(defaults.log_format),
            prometheus_enabled: get_bool_value(
                config,
                &["prometheus_enabled", "metrics.prometheus_enabled"],
                defaults.prometheus_enabled,
            ),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            anyhow::bail!("HOST must not be empty");
        }
        if self.port == 0 {
            anyhow::bail!("PORT must be greater than zero");
        }
        if self.model_path.as_os_str().is_empty() {
            anyhow::bail!("MODEL_PATH must not be empty");
        }
        if self.max_batch_size == 0 {
            anyhow::bail!("MAX_BATCH_SIZE must be greater than zero");
        }
        if self.inference_timeout_ms == 0 {
            anyhow::bail!("INFERENCE_TIMEOUT_MS must be greater than zero");
        }
        if self.max_upload_bytes == 0 {
            anyhow::bail!("MAX_UPLOAD_BYTES must be greater than zero");
        }
        if !LOG_FORMATS.contains(&self.log_format.as_str()) {
            anyhow::bail!(
                "LOG_FORMAT must be one of {}, got `{}`",
                LOG_FORMATS.join(", "),
                self.log_format
            );
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_bool_value(config: &Config, keys: &[&str], default: bool) -> bool {
    for key in keys {
        if let Ok(value) = config.get_bool(key) {
            return value;
        }
        if let Ok(raw) = config.get_string(key) {
            if let Ok(parsed) = raw.trim().parse::<bool>() {
                return parsed;
            }
        }
    }
    default
}

fn get_parsed_value<T>(config: &Config, keys: &[&str], default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    for key in keys {
        if let Some(raw) = get_string_value(config, &[key]) {
            return raw
                .parse()
                .with_context(|| format!("invalid value `{raw}` for `{key}`"));
        }
    }
    Ok(default)
}
