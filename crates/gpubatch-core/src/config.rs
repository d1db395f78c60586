use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "GPUBATCH_CONFIG";

/// Top-level context configuration, loaded from gpubatch.toml.
/// Read-only once a context has been built from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Number of recorded operations allowed to batch into one command
    /// buffer before a submission is forced
    #[serde(default = "default_submit_frequency")]
    pub cmd_submit_frequency: u32,
    #[serde(default)]
    pub cmd_pool: CommandPoolConfig,
    #[serde(default)]
    pub descriptor_pool: DescriptorPoolConfig,
    #[serde(default)]
    pub query_pool: QueryPoolConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPoolConfig {
    /// Command buffers allocated up front
    #[serde(default = "default_cmd_initial_size")]
    pub initial_size: u32,
    /// Command buffers allocated each time the pool runs dry
    #[serde(default = "default_cmd_batch_size")]
    pub batch_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorPoolConfig {
    #[serde(default = "default_max_sets")]
    pub max_sets: u32,
    #[serde(default = "default_descriptor_count")]
    pub uniform_buffer_count: u32,
    #[serde(default = "default_descriptor_count")]
    pub storage_buffer_count: u32,
    #[serde(default = "default_descriptor_count")]
    pub combined_sampler_count: u32,
    #[serde(default = "default_descriptor_count")]
    pub storage_image_count: u32,
    /// Descriptor sets allocated at once for a given layout
    #[serde(default = "default_pile_size")]
    pub pile_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPoolConfig {
    /// Timestamp queries available between resets (two per profiled op)
    #[serde(default = "default_max_query_count")]
    pub max_query_count: u32,
    /// Profiling entries reserved up front
    #[serde(default = "default_initial_reserve")]
    pub initial_reserve_size: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            cmd_submit_frequency: default_submit_frequency(),
            cmd_pool: CommandPoolConfig::default(),
            descriptor_pool: DescriptorPoolConfig::default(),
            query_pool: QueryPoolConfig::default(),
        }
    }
}

impl Default for CommandPoolConfig {
    fn default() -> Self {
        Self {
            initial_size: default_cmd_initial_size(),
            batch_size: default_cmd_batch_size(),
        }
    }
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        Self {
            max_sets: default_max_sets(),
            uniform_buffer_count: default_descriptor_count(),
            storage_buffer_count: default_descriptor_count(),
            combined_sampler_count: default_descriptor_count(),
            storage_image_count: default_descriptor_count(),
            pile_size: default_pile_size(),
        }
    }
}

impl Default for QueryPoolConfig {
    fn default() -> Self {
        Self {
            max_query_count: default_max_query_count(),
            initial_reserve_size: default_initial_reserve(),
        }
    }
}

impl ContextConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        let config: ContextConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file if it exists and is valid, otherwise return defaults.
    pub fn load_or_default(path: &str) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                debug!("using default context config ({}): {}", path, e);
                Self::default()
            }
        }
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.cmd_submit_frequency == 0 {
            return Err(CoreError::ConfigError(
                "cmd_submit_frequency must be at least 1".to_string(),
            ));
        }
        if self.cmd_pool.batch_size == 0 {
            return Err(CoreError::ConfigError(
                "cmd_pool.batch_size must be at least 1".to_string(),
            ));
        }
        if self.descriptor_pool.max_sets == 0 || self.descriptor_pool.pile_size == 0 {
            return Err(CoreError::ConfigError(
                "descriptor_pool.max_sets and pile_size must be at least 1".to_string(),
            ));
        }
        if self.descriptor_pool.pile_size > self.descriptor_pool.max_sets {
            return Err(CoreError::ConfigError(format!(
                "descriptor_pool.pile_size ({}) exceeds max_sets ({})",
                self.descriptor_pool.pile_size, self.descriptor_pool.max_sets
            )));
        }
        // Each profiled operation takes a start and an end timestamp
        let queries = self.query_pool.max_query_count;
        if queries == 0 || queries % 2 != 0 {
            return Err(CoreError::ConfigError(
                "query_pool.max_query_count must be even and at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

/// Returns the config file path.
/// Search order:
/// 1. `$GPUBATCH_CONFIG`
/// 2. Local fallback: `./gpubatch.toml`
pub fn default_config_path() -> String {
    std::env::var(CONFIG_ENV).unwrap_or_else(|_| "gpubatch.toml".to_string())
}

fn default_submit_frequency() -> u32 {
    16
}

fn default_cmd_initial_size() -> u32 {
    32
}

fn default_cmd_batch_size() -> u32 {
    8
}

fn default_max_sets() -> u32 {
    1024
}

fn default_descriptor_count() -> u32 {
    1024
}

fn default_pile_size() -> u32 {
    32
}

fn default_max_query_count() -> u32 {
    4096
}

fn default_initial_reserve() -> u32 {
    256
}
