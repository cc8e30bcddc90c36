use std::path::Path;

use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};

pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";
const ENV_PREFIX: &str = "CONFLUENCE_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads application configuration by merging defaults, the TOML file at
    /// [`DEFAULT_CONFIG_PATH`], and `CONFLUENCE_` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or the result
    /// fails validation.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration from a specific TOML file. A missing file is not an
    /// error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the result fails validation.
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig> {
        let config: AppConfig = Self::base(path.as_ref())
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Loads application configuration with a specific profile overlay
    /// (`Config.<profile>.toml` next to the base file).
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be parsed or the result
    /// fails validation.
    pub fn load_with_profile(path: impl AsRef<Path>, profile: &str) -> Result<AppConfig> {
        let path = path.as_ref();
        let profile_path = path.with_file_name(format!("Config.{profile}.toml"));
        let config: AppConfig = Self::base(path)
            .merge(Toml::file(profile_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    fn base(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .join(Json::file(path.with_extension("json")))
    }
}
