//! Persisted user configuration: the folder images are browsed from and the
//! images registered in earlier sessions.
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::source::AddOutcome;

const CONFIG_DIR_NAME: &str = "stickr";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub folder: PathBuf,
    /// Image files, oldest first. The first admitted one becomes current.
    pub images: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            folder: dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
            images: Vec::new(),
        }
    }
}

impl Config {
    /// `<config dir>/stickr/config.toml`, e.g. `~/.config/stickr/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or_else(|| Error::Config("Could not determine the config directory.".to_string()))
    }

    /// Loads the configuration at `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());
        match fs::read_to_string(path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No configuration file, using defaults.");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Registers the remembered images and selects the first one admitted.
    /// Images that no longer exist or are not supported are skipped.
    pub fn apply(&self, registry: &mut Registry) -> Result<()> {
        let mut first = None;
        for image in &self.images {
            let path = match registry.add_source(image) {
                AddOutcome::Added(path) | AddOutcome::AlreadyPresent(path) => path,
                AddOutcome::Rejected(reason) => {
                    debug!("Skipping remembered image {}: {:?}", image.display(), reason);
                    continue;
                }
            };
            first.get_or_insert(path);
        }

        if let Some(path) = first {
            registry.set_current_source(Some(&path))?;
        }
        Ok(())
    }

    /// Remembers the registry's sources, in the order they were added.
    pub fn capture(&mut self, registry: &Registry) {
        self.images = registry.sources().map(|s| s.path.clone()).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Notifier;
    use crate::probe::SystemProbe;
    use std::io::Write;
    use std::sync::Arc;

    fn img(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(&[0u8; 512]).unwrap();
        path
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "images = 3").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            folder: PathBuf::from("/home/user/Downloads"),
            images: vec![PathBuf::from("/a.iso"), PathBuf::from("/b.img")],
        };

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn apply_selects_first_admitted_image_and_capture_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = img(dir.path(), "first.img");
        let second = img(dir.path(), "second.img");
        let config = Config {
            folder: dir.path().to_path_buf(),
            images: vec![dir.path().join("gone.img"), first.clone(), second.clone()],
        };

        let mut registry = Registry::new(Arc::new(SystemProbe), Notifier::new());
        config.apply(&mut registry).unwrap();
        assert_eq!(registry.current_source().unwrap().path, first);

        let mut saved = Config::default();
        saved.capture(&registry);
        assert_eq!(saved.images, vec![first, second]);
    }
}
