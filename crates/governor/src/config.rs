//! Governor configuration loading
//!
//! Sources, lowest precedence first: built-in defaults, an optional file
//! named by `GOVERNOR_CONFIG_FILE`, then environment variables with `__`
//! separating the prefix and nested keys (`GOVERNOR__QUEUE__MAX_CONCURRENT=4`).

use anyhow::{anyhow, Context, Result};
use governor_lib::GovernorConfig;
use std::path::Path;

pub const CONFIG_FILE_ENV: &str = "GOVERNOR_CONFIG_FILE";
const ENV_PREFIX: &str = "GOVERNOR";

/// Load configuration from the environment and the optional config file
pub fn load() -> Result<GovernorConfig> {
    let file = std::env::var(CONFIG_FILE_ENV).ok();
    let mut config = load_from(file.as_deref().map(Path::new))?;

    if config.node_name == GovernorConfig::default().node_name {
        if let Ok(node_name) = std::env::var("NODE_NAME") {
            config.node_name = node_name;
        }
    }

    Ok(config)
}

/// Load configuration with `file` as the only file source
pub fn load_from(file: Option<&Path>) -> Result<GovernorConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = file {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to read governor configuration")?;

    let config: GovernorConfig = settings
        .try_deserialize()
        .context("Invalid governor configuration")?;

    config
        .validate()
        .map_err(|e| anyhow!("Invalid governor configuration: {}", e))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "node_name = \"pi-garage\"\napi_port = 9200\n\n[queue]\nmax_concurrent = 3\n\n[thermal]\nthrottle_temp = 65.0"
        )
        .unwrap();

        let config = load_from(Some(file.path())).unwrap();
        assert_eq!(config.node_name, "pi-garage");
        assert_eq!(config.api_port, 9200);
        assert_eq!(config.queue.max_concurrent, 3);
        assert_eq!(config.queue.max_queue_size, 10);
        assert_eq!(config.thermal.throttle_temp, 65.0);
    }

    #[test]
    fn test_invalid_section_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[orchestrator]\nhistory_capacity = 0").unwrap();

        let err = load_from(Some(file.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("history_capacity"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_from(Some(Path::new("/nonexistent/governor.toml"))).is_err());
    }
}
