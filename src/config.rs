use std::{
  fs, io,
  path::{Path, PathBuf},
};

use log::debug;
use serde_derive::Deserialize;
use thiserror::Error;

use crate::utils::Unit;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("{}: {err}", path.display())]
  Read { path: PathBuf, err: io::Error },
  #[error("{}: {err}", path.display())]
  Parse { path: PathBuf, err: toml::de::Error },
}

/// Global Config
///
/// Defaults for the command line flags.
///
/// Search path:
/// - `--config FILE`
/// - ./recidivm.toml (cwd of recidivm)
/// - /etc/recidivm.toml
/// - Default (when no config file available)
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  /// Reporting unit
  pub unit: Option<Unit>,
  /// Replay captured stdin to every probe
  pub capture_stdin: bool,
  /// Let the target write to our stdout and stderr
  pub print: bool,
  pub verbose: bool,
  /// Temporary file directory, defaults to `$TMPDIR` or /tmp
  pub tmp_dir: Option<PathBuf>,
}

const SEARCH_PATH: [&str; 2] = ["./recidivm.toml", "/etc/recidivm.toml"];

impl Config {
  /// Load the explicitly given file, or the first one found on the search path
  pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    if let Some(path) = explicit {
      return Self::read_from(path);
    }
    for path in SEARCH_PATH.iter().map(Path::new) {
      if path.is_file() {
        return Self::read_from(path);
      }
    }
    debug!("no config file found, using defaults");
    Ok(Self::default())
  }

  pub fn read_from(path: &Path) -> Result<Self, ConfigError> {
    let text = fs::read_to_string(path).map_err(|err| ConfigError::Read {
      path: path.to_owned(),
      err,
    })?;
    let config = Self::parse(&text).map_err(|err| ConfigError::Parse {
      path: path.to_owned(),
      err,
    })?;
    debug!("loaded config from {path:?}: {config:?}");
    Ok(config)
  }

  pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(text)
  }

  /// Directory for the stdin replica
  pub fn tmp_dir(&self) -> PathBuf {
    self.tmp_dir.clone().unwrap_or_else(std::env::temp_dir)
  }
}
