//! Command line configuration of the chunklog server.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::Config;
use crate::error::Result;

/// Command line arguments of the `chunklog` binary.
#[derive(Debug, Parser)]
#[command(name = "chunklog", about = "Append-only chunked log store")]
pub struct CliArgs {
    /// YAML file with the store configuration. Defaults apply when absent.
    #[arg(long, env = "CHUNKLOG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on.
    #[arg(long, env = "CHUNKLOG_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory for chunk files, overriding `data_dir` of the config file.
    #[arg(long, env = "CHUNKLOG_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Deadline applied to every API request, in milliseconds.
    #[arg(long, env = "CHUNKLOG_REQUEST_TIMEOUT_MS", default_value_t = 30_000)]
    pub request_timeout_ms: u64,
}

impl CliArgs {
    /// Builds the store configuration from the config file, if any, and the
    /// command line overrides.
    pub fn to_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_yaml_file(path)?,
            None => Config::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

/// Settings of the HTTP layer itself.
#[derive(Debug, Clone)]
pub struct LogServerConfig {
    pub port: u16,
    pub request_timeout: Duration,
}

impl Default for LogServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&CliArgs> for LogServerConfig {
    fn from(args: &CliArgs) -> Self {
        Self {
            port: args.port,
            request_timeout: Duration::from_millis(args.request_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_apply_defaults_and_overrides() {
        // given
        let args = CliArgs::parse_from(["chunklog", "--data-dir", "/tmp/x", "--port", "9000"]);

        // when
        let config = args.to_config().unwrap();
        let server = LogServerConfig::from(&args);

        // then
        assert_eq!(config.data_dir, PathBuf::from("/tmp/x"));
        assert_eq!(config.max_opened_chunks, 100);
        assert_eq!(server.port, 9000);
        assert_eq!(server.request_timeout, Duration::from_secs(30));
    }
}
