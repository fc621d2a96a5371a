use std::path::PathBuf;

use color_eyre::eyre::{
    Error,
    eyre,
};
use directories::ProjectDirs;
use serde::{
    Deserialize,
    Serialize,
};

/// Settings that persist across runs, most importantly the sound-card clock
/// calibration.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub calibration: f64,
}

impl AppConfig {
    fn path() -> Result<PathBuf, Error> {
        let project_dirs = ProjectDirs::from("", "wefax", "wefax-cli")
            .ok_or_else(|| eyre!("Could not determine project directories"))?;
        Ok(project_dirs.config_dir().join("config.toml"))
    }

    pub fn load() -> Result<Self, Error> {
        let path = Self::path()?;
        if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            Ok(toml::from_str(&data)?)
        }
        else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<(), Error> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "saved configuration");
        Ok(())
    }
}
