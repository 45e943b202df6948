//! Configuration loading helpers.

use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::buffer_pool::PinnedBufferPool;
use crate::constants::{DEFAULT_BUFFER_SIZE, DEFAULT_SECTOR_SIZE};

/// Errors returned by configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error while reading config files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error.
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Invalid value for a key.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Raw value string.
        value: String,
    },
    /// Unknown configuration key.
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Top-level configuration schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PendioConfig {
    /// Buffer pool configuration.
    pub buffer_pool: Option<BufferPoolConfig>,
}

impl PendioConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration from the `PENDIO_CONFIG` env var (if set), then
    /// apply `PENDIO__section__field` overrides.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let config_path = env::var("PENDIO_CONFIG").ok();
        let mut config = match config_path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment overrides in-place.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        for (key, value) in env::vars() {
            if !key.starts_with("PENDIO__") {
                continue;
            }
            let path = key["PENDIO__".len()..].to_ascii_lowercase();
            let parts: Vec<&str> = path.split("__").collect();
            let value = value.trim().to_string();

            match parts.as_slice() {
                ["buffer_pool", "buffer_size"] => {
                    self.buffer_pool_mut().buffer_size = Some(parse_value(&key, &value)?);
                }
                ["buffer_pool", "alignment"] => {
                    self.buffer_pool_mut().alignment = Some(parse_value(&key, &value)?);
                }
                ["buffer_pool", "initial_count"] => {
                    self.buffer_pool_mut().initial_count = Some(parse_value(&key, &value)?);
                }
                ["buffer_pool", "max_pooled"] => {
                    self.buffer_pool_mut().max_pooled = Some(parse_value(&key, &value)?);
                }
                _ => return Err(ConfigError::UnknownKey(key)),
            }
        }

        Ok(())
    }

    /// Validate the configuration and build the buffer pool it describes.
    pub fn open_buffer_pool(&self) -> Result<PinnedBufferPool, ConfigError> {
        let resolved = self
            .buffer_pool
            .as_ref()
            .map(BufferPoolConfig::resolve)
            .transpose()?
            .unwrap_or_default();
        Ok(PinnedBufferPool::new(
            resolved.buffer_size,
            resolved.alignment,
            resolved.initial_count,
            resolved.max_pooled,
        ))
    }

    fn buffer_pool_mut(&mut self) -> &mut BufferPoolConfig {
        if self.buffer_pool.is_none() {
            self.buffer_pool = Some(BufferPoolConfig::default());
        }
        self.buffer_pool.as_mut().expect("buffer pool config")
    }
}

/// Buffer pool configuration overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BufferPoolConfig {
    /// Size of each pinned buffer in bytes.
    pub buffer_size: Option<usize>,
    /// Buffer alignment; must be a power of two.
    pub alignment: Option<usize>,
    /// Number of buffers pre-allocated at pool creation.
    pub initial_count: Option<usize>,
    /// Maximum number of free buffers the pool retains.
    pub max_pooled: Option<usize>,
}

impl BufferPoolConfig {
    fn resolve(&self) -> Result<ResolvedBufferPool, ConfigError> {
        let mut resolved = ResolvedBufferPool::default();
        if let Some(value) = self.buffer_size {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "buffer_pool.buffer_size".into(),
                    value: value.to_string(),
                });
            }
            resolved.buffer_size = value;
        }
        if let Some(value) = self.alignment {
            if value == 0 || !value.is_power_of_two() {
                return Err(ConfigError::InvalidValue {
                    key: "buffer_pool.alignment".into(),
                    value: value.to_string(),
                });
            }
            resolved.alignment = value;
        }
        if let Some(value) = self.initial_count {
            resolved.initial_count = value;
        }
        if let Some(value) = self.max_pooled {
            resolved.max_pooled = value;
        }

        if resolved.buffer_size % resolved.alignment != 0 {
            return Err(ConfigError::InvalidValue {
                key: "buffer_pool.buffer_size".into(),
                value: resolved.buffer_size.to_string(),
            });
        }
        Ok(resolved)
    }
}

struct ResolvedBufferPool {
    buffer_size: usize,
    alignment: usize,
    initial_count: usize,
    max_pooled: usize,
}

impl Default for ResolvedBufferPool {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            alignment: DEFAULT_SECTOR_SIZE,
            initial_count: 16,
            max_pooled: 64,
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[buffer_pool]\nbuffer_size = 8192\nalignment = 4096\ninitial_count = 2\nmax_pooled = 4"
        )
        .unwrap();

        let config = PendioConfig::load_from_path(file.path()).unwrap();
        let pool = config.open_buffer_pool().unwrap();
        assert_eq!(pool.buffer_size(), 8192);
        assert_eq!(pool.alignment(), 4096);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();

        env::set_var("PENDIO__buffer_pool__buffer_size", "2048");
        env::set_var("PENDIO__buffer_pool__initial_count", "1");

        let mut config = PendioConfig::default();
        let result = config.apply_env_overrides();

        env::remove_var("PENDIO__buffer_pool__buffer_size");
        env::remove_var("PENDIO__buffer_pool__initial_count");

        result.unwrap();
        let pool_config = config.buffer_pool.unwrap();
        assert_eq!(pool_config.buffer_size, Some(2048));
        assert_eq!(pool_config.initial_count, Some(1));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();

        env::set_var("PENDIO__buffer_pool__bogus", "1");
        let mut config = PendioConfig::default();
        let result = config.apply_env_overrides();
        env::remove_var("PENDIO__buffer_pool__bogus");

        assert!(matches!(result, Err(ConfigError::UnknownKey(_))));
    }

    #[test]
    fn test_invalid_alignment_rejected() {
        let config = PendioConfig {
            buffer_pool: Some(BufferPoolConfig {
                alignment: Some(513),
                ..Default::default()
            }),
        };
        assert!(matches!(
            config.open_buffer_pool(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_defaults() {
        let pool = PendioConfig::default().open_buffer_pool().unwrap();
        assert_eq!(pool.buffer_size(), DEFAULT_BUFFER_SIZE);
        assert_eq!(pool.alignment(), DEFAULT_SECTOR_SIZE);
    }
}
