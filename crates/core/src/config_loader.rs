use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by layering the built-in defaults, an optional
    /// TOML file, and `PREDMARKET_`-prefixed environment variables.
    ///
    /// # Errors
    /// Returns an error if the file cannot be parsed or the merged
    /// configuration fails validation.
    pub fn load(path: &str) -> Result<AppConfig> {
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PREDMARKET_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration with a profile overlay
    /// (`Config.toml` then `Config.<profile>.toml`).
    ///
    /// # Errors
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_with_profile(path: &str, profile: &str) -> Result<AppConfig> {
        let base = path.trim_end_matches(".toml");
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Toml::file(format!("{base}.{profile}.toml")))
            .merge(Env::prefixed("PREDMARKET_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }
}
