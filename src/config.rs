//! Runtime and pipeline configuration.
//!
//! Both structs deserialize from JSON with every field optional, so a config
//! file only needs to name what it overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default bounded queue capacity per stage instance.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
  /// The file could not be read.
  #[error("failed to read config '{}': {source}", .path.display())]
  Io {
    /// Config path.
    path: PathBuf,
    /// Underlying I/O error.
    #[source]
    source: std::io::Error,
  },
  /// The file is not valid JSON for the expected shape.
  #[error("invalid config: {0}")]
  Parse(#[from] serde_json::Error),
}

/// Settings shared by every stage of a topology.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
  /// Capacity of each instance's inbound queue.
  pub channel_capacity: usize,
  /// Upper bound applied to every stage's parallelism.
  pub max_task_parallelism: Option<usize>,
  /// Log every emitted record at `TRACE`.
  pub debug: bool,
}

impl Default for RuntimeConfig {
  fn default() -> Self {
    Self {
      channel_capacity: DEFAULT_CHANNEL_CAPACITY,
      max_task_parallelism: None,
      debug: false,
    }
  }
}

impl RuntimeConfig {
  /// Sets the inbound queue capacity.
  #[must_use]
  pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
    self.channel_capacity = capacity;
    self
  }

  /// Caps every stage's parallelism.
  #[must_use]
  pub fn with_max_task_parallelism(mut self, max: usize) -> Self {
    self.max_task_parallelism = Some(max);
    self
  }

  /// Enables per-record trace logging.
  #[must_use]
  pub fn with_debug(mut self, debug: bool) -> Self {
    self.debug = debug;
    self
  }

  /// Applies the parallelism cap.
  pub fn effective_parallelism(&self, requested: usize) -> usize {
    match self.max_task_parallelism {
      Some(max) => requested.min(max.max(1)),
      None => requested,
    }
  }
}

/// Configuration of the word-count pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WordCountConfig {
  /// Directory whose files are read, recursively.
  pub text_root: PathBuf,
  /// Instances of the text source.
  pub source_parallelism: usize,
  /// Instances of the splitter.
  pub splitter_parallelism: usize,
  /// Instances of the counter.
  pub counter_parallelism: usize,
  /// Shared runtime settings.
  pub runtime: RuntimeConfig,
}

impl Default for WordCountConfig {
  fn default() -> Self {
    Self {
      text_root: PathBuf::from("resources/sherlock-holmes"),
      source_parallelism: 1,
      splitter_parallelism: 5,
      counter_parallelism: 3,
      runtime: RuntimeConfig::default(),
    }
  }
}

impl WordCountConfig {
  /// Parses a JSON document.
  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(json)?)
  }

  /// Reads and parses a JSON file.
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json_str(&json)
  }

  /// Sets the text root.
  #[must_use]
  pub fn with_text_root(mut self, root: impl Into<PathBuf>) -> Self {
    self.text_root = root.into();
    self
  }

  /// Sets parallelism for the source, splitter and counter.
  #[must_use]
  pub fn with_parallelism(mut self, source: usize, splitter: usize, counter: usize) -> Self {
    self.source_parallelism = source;
    self.splitter_parallelism = splitter;
    self.counter_parallelism = counter;
    self
  }

  /// Replaces the runtime settings.
  #[must_use]
  pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
    self.runtime = runtime;
    self
  }
}
