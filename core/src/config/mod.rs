mod load;
mod types;

pub use load::{
    apply_env_overrides, find_config_file, load, parse_config, CONFIG_FILE_NAME, ENV_PREFIX,
};
pub use types::{AppConfig, LoggingConfig, ServerConfig, UserConfig};
