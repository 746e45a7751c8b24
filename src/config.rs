use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};

/// default repository directory name
pub const DEFAULT_DIR: &str = ".cas";

/// pin name substituted when the caller passes an empty one
pub const DEFAULT_PIN: &str = "root";

/// repository open options
///
/// callers embedding the store can keep this in a TOML file; the
/// repository itself never writes one (the on-disk layout is only
/// `blobs/`, `pins/` and `tmp/`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// repository path
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    /// create the layout if the directory is absent
    #[serde(default)]
    pub create: bool,
    /// pin name used when an empty one is given
    #[serde(default = "default_pin")]
    pub pin_default: String,
}

fn default_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DIR)
}

fn default_pin() -> String {
    DEFAULT_PIN.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            create: false,
            pin_default: default_pin(),
        }
    }
}

impl Config {
    /// config rooted at the given directory
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// enable layout creation
    pub fn create(mut self) -> Self {
        self.create = true;
        self
    }

    /// load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// save config to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }
}
