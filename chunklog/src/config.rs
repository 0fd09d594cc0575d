//! Configuration for the chunklog store.
//!
//! Configuration is plain serde data, usually loaded from YAML with
//! [`Config::from_yaml_file`]. Every field has a default, so a config file
//! only needs to name what it overrides:
//!
//! ```yaml
//! data_dir: /var/lib/chunklog
//! max_opened_chunks: 256
//! chunk:
//!   max_chunk_size: 33554432
//! log:
//!   max_records_limit: 500
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MIB: u64 = 1024 * 1024;

/// Top level store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the chunk files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Maximum number of chunk files kept open at the same time.
    ///
    /// Raising it helps workloads that touch many logs at random; every open
    /// chunk costs a file descriptor.
    #[serde(default = "default_max_opened_chunks")]
    pub max_opened_chunks: usize,

    #[serde(default)]
    pub chunk: ChunkConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub service: ServiceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_opened_chunks: default_max_opened_chunks(),
            chunk: ChunkConfig::default(),
            log: LogConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("slogs")
}

fn default_max_opened_chunks() -> usize {
    100
}

/// Sizing of chunk files.
///
/// A chunk file is created with `new_size` bytes and grows by at most
/// `max_grow_increase_size` bytes at a time until it reaches
/// `max_chunk_size`, after which the log moves on to a fresh chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkConfig {
    #[serde(default = "default_new_size")]
    pub new_size: u64,

    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,

    #[serde(default = "default_max_grow_increase_size")]
    pub max_grow_increase_size: u64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            new_size: default_new_size(),
            max_chunk_size: default_max_chunk_size(),
            max_grow_increase_size: default_max_grow_increase_size(),
        }
    }
}

fn default_new_size() -> u64 {
    MIB
}

fn default_max_chunk_size() -> u64 {
    16 * MIB
}

fn default_max_grow_increase_size() -> u64 {
    MIB
}

/// Per-call limits of the log orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Upper bound on records returned by one query. A request asking for
    /// more (or for zero, meaning "no preference") is capped here.
    #[serde(default = "default_max_records_limit")]
    pub max_records_limit: usize,

    /// Upper bound on the summed payload bytes returned by one query.
    #[serde(default = "default_max_bunch_size")]
    pub max_bunch_size: u64,

    /// Maximum number of logs admitted concurrently.
    #[serde(default = "default_max_locks")]
    pub max_locks: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_records_limit: default_max_records_limit(),
            max_bunch_size: default_max_bunch_size(),
            max_locks: default_max_locks(),
        }
    }
}

fn default_max_records_limit() -> usize {
    1000
}

fn default_max_bunch_size() -> u64 {
    10 * MIB
}

fn default_max_locks() -> usize {
    10_000
}

/// Limits of the multi-log service layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Maximum number of logs one query may merge.
    #[serde(default = "default_max_logs_to_merge")]
    pub max_logs_to_merge: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_logs_to_merge: default_max_logs_to_merge(),
        }
    }
}

fn default_max_logs_to_merge() -> usize {
    1000
}

impl Config {
    /// Parses a YAML document, filling omitted fields with defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Invalid(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a YAML config file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Invalid(format!("could not read config {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Rejects settings the store cannot operate with.
    pub fn validate(&self) -> Result<()> {
        let chunk = &self.chunk;
        if chunk.new_size <= crate::chunkfs::HEADER_SIZE {
            return Err(Error::Invalid(format!(
                "chunk.new_size must exceed the {} byte header, got {}",
                crate::chunkfs::HEADER_SIZE,
                chunk.new_size
            )));
        }
        if chunk.max_chunk_size < chunk.new_size {
            return Err(Error::Invalid(format!(
                "chunk.max_chunk_size ({}) is smaller than chunk.new_size ({})",
                chunk.max_chunk_size, chunk.new_size
            )));
        }
        if chunk.max_grow_increase_size == 0 {
            return Err(Error::Invalid(
                "chunk.max_grow_increase_size must be positive".into(),
            ));
        }
        if self.max_opened_chunks == 0 {
            return Err(Error::Invalid("max_opened_chunks must be positive".into()));
        }
        if self.log.max_records_limit == 0 || self.log.max_bunch_size == 0 {
            return Err(Error::Invalid(
                "log.max_records_limit and log.max_bunch_size must be positive".into(),
            ));
        }
        if self.log.max_locks == 0 {
            return Err(Error::Invalid("log.max_locks must be positive".into()));
        }
        if self.service.max_logs_to_merge == 0 {
            return Err(Error::Invalid(
                "service.max_logs_to_merge must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_fill_defaults_for_missing_fields() {
        // given
        let yaml = r#"
data_dir: /tmp/chunks
chunk:
  max_chunk_size: 8388608
log:
  max_records_limit: 50
"#;

        // when
        let config = Config::from_yaml_str(yaml).unwrap();

        // then
        assert_eq!(config.data_dir, PathBuf::from("/tmp/chunks"));
        assert_eq!(config.max_opened_chunks, 100);
        assert_eq!(config.chunk.new_size, MIB);
        assert_eq!(config.chunk.max_chunk_size, 8 * MIB);
        assert_eq!(config.log.max_records_limit, 50);
        assert_eq!(config.log.max_bunch_size, 10 * MIB);
        assert_eq!(config.service.max_logs_to_merge, 1000);
    }

    #[test]
    fn should_accept_empty_document() {
        // when
        let config = Config::from_yaml_str("{}").unwrap();

        // then
        assert_eq!(config, Config::default());
    }

    #[test]
    fn should_reject_max_size_below_new_size() {
        // given
        let yaml = "chunk:\n  new_size: 4096\n  max_chunk_size: 1024\n";

        // when
        let result = Config::from_yaml_str(yaml);

        // then
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[test]
    fn should_reject_zero_limits() {
        // given
        let mut config = Config::default();
        config.log.max_records_limit = 0;

        // when/then
        assert!(matches!(config.validate(), Err(Error::Invalid(_))));
    }

    #[test]
    fn should_reject_malformed_yaml() {
        // when
        let result = Config::from_yaml_str("max_opened_chunks: [not, a, number]");

        // then
        assert!(matches!(result, Err(Error::Invalid(_))));
    }
}
