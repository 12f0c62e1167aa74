use serde::de::DeserializeOwned;
use std::path::Path;

use crate::environment::Environment;

/// Directory, relative to the working directory, holding configuration files.
const CONFIGURATION_DIR: &str = "configuration";

/// File loaded for every environment before the environment-specific one.
const BASE_CONFIG_FILE: &str = "base.yaml";

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "STREAMWIRE";

const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested keys: `STREAMWIRE_POOL__MAX_SIZE` sets `pool.max_size`.
const ENV_SEPARATOR: &str = "__";

const LIST_SEPARATOR: &str = ",";

/// Lists the keys of a configuration type that are parsed as comma-separated lists
/// when they come from environment variables.
pub trait Config {
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Loads configuration from `./configuration` in the current directory.
///
/// See [`load_config_from`] for the layering rules.
pub fn load_config<T>() -> Result<T, config::ConfigError>
where
    T: Config + DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("cannot determine the current directory: {e}"))
    })?;

    load_config_from(&base_path.join(CONFIGURATION_DIR))
}

/// Loads hierarchical configuration from `directory`.
///
/// Sources, later ones overriding earlier ones:
/// 1. `base.yaml`
/// 2. `{environment}.yaml`, where the environment comes from `STREAMWIRE_ENVIRONMENT`
/// 3. `STREAMWIRE_`-prefixed environment variables
pub fn load_config_from<T>(directory: &Path) -> Result<T, config::ConfigError>
where
    T: Config + DeserializeOwned,
{
    let environment =
        Environment::load().map_err(|e| config::ConfigError::Message(e.to_string()))?;
    let environment_filename = format!("{environment}.yaml");

    let mut environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if !<T as Config>::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source
            .try_parsing(true)
            .list_separator(LIST_SEPARATOR);

        for key in <T as Config>::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(directory.join(BASE_CONFIG_FILE)))
        .add_source(config::File::from(directory.join(environment_filename)).required(false))
        .add_source(environment_source)
        .build()?;

    settings.try_deserialize::<T>()
}
