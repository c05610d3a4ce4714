//! Run Configuration
//!
//! Knobs that affect how a workflow runs but not what it computes. Loaded
//! from a YAML file (`--config`) and then overridden by command-line flags.
//!
//! ```yaml
//! max_tasks: 8
//! channel_capacity: 64
//! atomic_outputs: true
//! skip_existing: true
//! remove_temp_files: false
//! working_dir: /data/analysis
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::workflow::port::DEFAULT_CHANNEL_CAPACITY;

/// Run-time settings for the [`Engine`](crate::execution::Engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Maximum number of external commands running at once
    pub max_tasks: usize,
    /// Tokens buffered per connection before the producer blocks
    pub channel_capacity: usize,
    /// Write outputs to `<path>.tmp` and rename after success
    pub atomic_outputs: bool,
    /// Skip invocations whose outputs all exist
    pub skip_existing: bool,
    /// Delete outputs marked as temporary after a successful run
    pub remove_temp_files: bool,
    /// Render and log commands without running them
    pub dry_run: bool,
    /// Directory commands run in
    pub working_dir: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_tasks: num_cpus::get(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            atomic_outputs: true,
            skip_existing: false,
            remove_temp_files: false,
            dry_run: false,
            working_dir: None,
        }
    }
}

impl RunConfig {
    /// Loads a configuration file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            FlowError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&content)
            .map_err(|e| FlowError::Config(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded run configuration from {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// Parses a configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, String> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.max_tasks == 0 {
            return Err("max_tasks must be at least 1".to_string());
        }
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}
