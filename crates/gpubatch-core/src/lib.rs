pub mod config;
pub mod error;

pub use config::{
    default_config_path, CommandPoolConfig, ContextConfig, DescriptorPoolConfig,
    QueryPoolConfig, CONFIG_ENV,
};
pub use error::CoreError;
