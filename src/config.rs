//! Configuration management for the explorer.
//!
//! This module handles loading and saving configuration from disk,
//! including timeouts, default name filters and extra UUID names.

use std::{
   env, fs,
   path::{Path, PathBuf},
   time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{ExploreError, Result};

/// Main configuration structure.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
   #[serde(default = "default_filters")]
   pub default_filters: Vec<String>,

   #[serde(default = "default_connect_timeout")]
   pub connect_timeout_sec: u64,

   #[serde(default = "default_shutdown_grace")]
   pub shutdown_grace_sec: u64,

   #[serde(default = "default_repeat_window")]
   pub repeat_interrupt_window_sec: u64,

   #[serde(default = "default_startup_failure_delay")]
   pub startup_failure_delay_sec: u64,

   #[serde(default = "default_rescan_interval")]
   pub rescan_interval_sec: u64,

   #[serde(default)]
   pub extra_names: Vec<ExtraName>,
}

/// An additional UUID/name pair registered with the naming table at startup.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ExtraName {
   pub uuid: String,
   pub name: String,
}

fn default_filters() -> Vec<String> {
   vec!["Polar".to_string()]
}

const fn default_connect_timeout() -> u64 {
   10
}

const fn default_shutdown_grace() -> u64 {
   10
}

const fn default_repeat_window() -> u64 {
   4
}

const fn default_startup_failure_delay() -> u64 {
   2
}

const fn default_rescan_interval() -> u64 {
   5
}

impl Default for Config {
   fn default() -> Self {
      Self {
         default_filters: default_filters(),
         connect_timeout_sec: default_connect_timeout(),
         shutdown_grace_sec: default_shutdown_grace(),
         repeat_interrupt_window_sec: default_repeat_window(),
         startup_failure_delay_sec: default_startup_failure_delay(),
         rescan_interval_sec: default_rescan_interval(),
         extra_names: vec![],
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
         let config: Self = toml::from_str(&contents)?;
         config.validate()?;
         Ok(config)
      } else {
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   /// Rejects durations that cannot drive a timer or a connect attempt.
   fn validate(&self) -> Result<()> {
      if self.connect_timeout_sec == 0 {
         return Err(ExploreError::InvalidConfig("connect_timeout_sec"));
      }
      if self.rescan_interval_sec == 0 {
         return Err(ExploreError::InvalidConfig("rescan_interval_sec"));
      }
      Ok(())
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
      let config_dir = if let Ok(home) = env::var("BLEEXPLORE_HOME") {
         PathBuf::from(home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Some(dir) = dirs::config_dir() {
         dir
      } else {
         return Err(ExploreError::ConfigDirNotFound);
      };

      Ok(config_dir.join("bleexplore").join("config.toml"))
   }

   /// Filters to use when none were given on the command line.
   pub fn filters_or_default(&self, given: Vec<String>) -> Vec<String> {
      if given.is_empty() {
         self.default_filters.clone()
      } else {
         given
      }
   }

   pub const fn connect_timeout(&self) -> Duration {
      Duration::from_secs(self.connect_timeout_sec)
   }

   pub const fn shutdown_grace(&self) -> Duration {
      Duration::from_secs(self.shutdown_grace_sec)
   }

   pub const fn repeat_interrupt_window(&self) -> Duration {
      Duration::from_secs(self.repeat_interrupt_window_sec)
   }

   pub const fn startup_failure_delay(&self) -> Duration {
      Duration::from_secs(self.startup_failure_delay_sec)
   }

   pub const fn rescan_interval(&self) -> Duration {
      Duration::from_secs(self.rescan_interval_sec)
   }
}
