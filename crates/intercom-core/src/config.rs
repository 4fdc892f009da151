//! Engine configuration object and file loading
//!
//! The backend accepts a typed [`EngineConfig`] at construction and at
//! reload. `fs` and `frame_size` are compile-time constants of the engine;
//! a configured value that differs is reported as a warning and the
//! compiled value keeps being used. `headroom_db` is applied live.

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::types::{FRAME_SIZE, SAMPLE_RATE};

/// Typed engine configuration, as carried in config files and the health
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub fs: u32,
    pub frame_size: usize,
    pub headroom_db: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fs: SAMPLE_RATE,
            frame_size: FRAME_SIZE,
            headroom_db: 12.0,
        }
    }
}

/// A configured value that disagrees with a compiled engine constant.
/// Reported, never fatal: processing continues on the compiled value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigMismatch {
    pub field: &'static str,
    pub configured: f64,
    pub compiled: f64,
}

impl std::fmt::Display for ConfigMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "config {} = {} differs from compiled value {}; using compiled value",
            self.field, self.configured, self.compiled
        )
    }
}

impl EngineConfig {
    /// Load from `path`, falling back to `example_path` and then to the
    /// built-in defaults.
    pub fn load(path: &Path, example_path: &Path) -> Self {
        if path.exists() {
            load_config(path)
        } else if example_path.exists() {
            log::warn!(
                "config file {:?} not found, loading example {:?}",
                path,
                example_path
            );
            load_config(example_path)
        } else {
            log::warn!(
                "no config file at {:?} or {:?}, using built-in defaults",
                path,
                example_path
            );
            Self::default()
        }
    }

    /// Compare against the compiled engine constants.
    pub fn mismatches(&self) -> Vec<ConfigMismatch> {
        let mut out = Vec::new();
        if self.fs != SAMPLE_RATE {
            out.push(ConfigMismatch {
                field: "fs",
                configured: self.fs as f64,
                compiled: SAMPLE_RATE as f64,
            });
        }
        if self.frame_size != FRAME_SIZE {
            out.push(ConfigMismatch {
                field: "frame_size",
                configured: self.frame_size as f64,
                compiled: FRAME_SIZE as f64,
            });
        }
        out
    }
}

/// Load configuration from a YAML file.
///
/// If the file doesn't exist or fails to parse, logs a warning and returns
/// the default config.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("load_config: {:?} doesn't exist, using defaults", path);
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => {
                log::info!("load_config: loaded {:?}", path);
                config
            }
            Err(e) => {
                log::warn!("load_config: failed to parse {:?}: {}, using defaults", path, e);
                T::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: failed to read {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories as
/// needed.
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))?;
    Ok(())
}
