//! Configuration management for the printer service.
//!
//! This module handles loading and saving configuration from disk,
//! including the printer to connect to and RFCOMM parameters.

use std::{
   env, fs,
   path::{Path, PathBuf},
   time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{PrinterError, Result};

/// Main configuration structure for the service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
   /// Address of the printer to connect to at startup.
   #[serde(default)]
   pub printer: Option<String>,

   /// BlueZ adapter name, the default adapter when unset.
   #[serde(default)]
   pub adapter: Option<String>,

   /// Fixed RFCOMM channel. Unset looks the Serial Port Profile up in the
   /// printer's service record.
   #[serde(default)]
   pub channel: Option<u8>,

   /// Zero disables the timeout.
   #[serde(default)]
   pub connect_timeout_sec: u64,

   #[serde(default = "default_connect_on_start")]
   pub connect_on_start: bool,
}

const fn default_connect_on_start() -> bool {
   true
}

impl Default for Config {
   fn default() -> Self {
      Self {
         printer: None,
         adapter: None,
         channel: None,
         connect_timeout_sec: 0,
         connect_on_start: default_connect_on_start(),
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         let contents = fs::read_to_string(path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   fn save_to(&self, path: &Path) -> Result<()> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      if let Ok(home) = env::var("ESCPOSD_HOME") {
         return Ok(PathBuf::from(home).join("config.toml"));
      }

      let config_dir = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Some(home) = dirs::home_dir() {
         home.join(".config")
      } else {
         return Err(PrinterError::ConfigDirNotFound);
      };

      Ok(config_dir.join("escposd").join("config.toml"))
   }

   /// Connect timeout for the transport, if one is configured.
   pub fn connect_timeout(&self) -> Option<Duration> {
      (self.connect_timeout_sec > 0).then(|| Duration::from_secs(self.connect_timeout_sec))
   }
}
