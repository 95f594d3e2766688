//! Connection configuration, loadable from the `[ibcached]` table of a TOML
//! file.

use std::io;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::proto::codec::{HEADER_LEN, RESPONSE_HEADER_LEN};
use crate::proto::poll::PollBudget;
use crate::rdma::qp::QpCaps;
use crate::rdma::type_alias::*;
use crate::utils::hostname::hostname;

/// How the local GID index is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum GidIndexPolicy {
    /// The raw value of one byte of the local hostname. Sites that name
    /// hosts so that this byte selects a valid index rely on it.
    Hostname { byte: usize },

    /// A fixed index.
    Fixed { index: GidIndex },

    /// No global routing; peers are addressed by LID alone.
    Disabled,
}

impl Default for GidIndexPolicy {
    fn default() -> Self {
        GidIndexPolicy::Hostname { byte: 2 }
    }
}

impl GidIndexPolicy {
    /// Resolve the index on this host. `None` disables global routing.
    pub fn resolve(&self) -> io::Result<Option<GidIndex>> {
        match *self {
            GidIndexPolicy::Fixed { index } => Ok(Some(index)),
            GidIndexPolicy::Disabled => Ok(None),
            GidIndexPolicy::Hostname { byte } => {
                let name = hostname()?;
                name.get(byte).copied().map(Some).ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("hostname has no byte {}", byte),
                    )
                })
            }
        }
    }
}

/// Configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file")]
    Io(#[from] io::Error),

    #[error("malformed configuration")]
    Toml(#[from] toml::de::Error),

    #[error("`ibcached` table not found")]
    MissingTable,

    #[error("invalid device pattern")]
    Device(#[from] regex::Error),

    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Settings of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Regular expression selecting the device by name. `None` takes the
    /// first device found.
    pub device: Option<String>,
    pub port: PortNum,
    pub gid_index: GidIndexPolicy,

    /// Capacity of each of the inbound and outbound buffers.
    pub buf_size: usize,

    pub cq_depth: u32,
    pub max_send_wr: u32,
    pub max_recv_wr: u32,
    pub max_send_sge: u32,
    pub max_recv_sge: u32,
    pub max_inline_data: u32,

    /// Retry ceiling of the wait for a message's last byte.
    pub landing_spins: u64,
    /// Client wait for a response to begin arriving.
    pub response_timeout_ms: u64,
    /// Wait for send completions, in flow control and at teardown.
    pub drain_timeout_ms: u64,
    /// Server wait for the next request.
    pub idle_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: None,
            port: 1,
            gid_index: GidIndexPolicy::default(),
            buf_size: 64 * 1024,
            cq_depth: 20,
            max_send_wr: 20,
            max_recv_wr: 20,
            max_send_sge: 20,
            max_recv_sge: 20,
            max_inline_data: 256,
            landing_spins: 100_000,
            response_timeout_ms: 5_000,
            drain_timeout_ms: 1_000,
            idle_timeout_ms: 3_600_000,
        }
    }
}

impl Config {
    /// Load the `[ibcached]` table of a TOML file and validate it.
    pub fn load_toml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let mut root: toml::Table = toml::from_str(text)?;
        let table = match root.remove("ibcached") {
            Some(toml::Value::Table(t)) => t,
            _ => return Err(ConfigError::MissingTable),
        };
        let config: Config = table.try_into()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(pattern) = &self.device {
            regex::Regex::new(pattern)?;
        }
        if self.buf_size < HEADER_LEN.max(RESPONSE_HEADER_LEN) {
            return Err(ConfigError::Invalid("buf_size cannot hold a message header"));
        }
        if self.buf_size > u32::MAX as usize {
            return Err(ConfigError::Invalid("buf_size exceeds what a region may span"));
        }
        if self.cq_depth == 0 || self.max_send_wr == 0 || self.max_recv_wr == 0 {
            return Err(ConfigError::Invalid("queue capacities must be non-zero"));
        }
        if self.max_send_sge == 0 || self.max_recv_sge == 0 {
            return Err(ConfigError::Invalid("scatter/gather capacities must be non-zero"));
        }
        if self.cq_depth < self.max_send_wr {
            return Err(ConfigError::Invalid("cq_depth must hold a full send queue"));
        }
        Ok(())
    }

    pub fn qp_caps(&self) -> QpCaps {
        QpCaps::new(
            self.max_send_wr,
            self.max_recv_wr,
            self.max_send_sge,
            self.max_recv_sge,
            self.max_inline_data,
        )
    }

    pub fn landing_budget(&self) -> PollBudget {
        PollBudget::spins(self.landing_spins)
    }

    pub fn response_budget(&self) -> PollBudget {
        PollBudget::timeout(Duration::from_millis(self.response_timeout_ms))
    }

    pub fn drain_budget(&self) -> PollBudget {
        PollBudget::timeout(Duration::from_millis(self.drain_timeout_ms))
    }

    pub fn idle_budget(&self) -> PollBudget {
        PollBudget::timeout(Duration::from_millis(self.idle_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_queue_sizes() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.port, 1);
        assert_eq!(config.qp_caps(), QpCaps::default());
        assert_eq!(config.gid_index, GidIndexPolicy::Hostname { byte: 2 });
    }

    #[test]
    fn load_from_toml() {
        let config = Config::from_toml_str(
            r#"
            [other]
            x = 1

            [ibcached]
            device = "^mlx5_[0-9]$"
            buf_size = 4096
            gid_index = { policy = "fixed", index = 3 }
            "#,
        )
        .unwrap();
        assert_eq!(config.device.as_deref(), Some("^mlx5_[0-9]$"));
        assert_eq!(config.buf_size, 4096);
        assert_eq!(config.gid_index, GidIndexPolicy::Fixed { index: 3 });
        assert_eq!(config.cq_depth, 20);
        assert_eq!(config.gid_index.resolve().unwrap(), Some(3));
    }

    #[test]
    fn bad_configs_are_rejected() {
        assert!(matches!(
            Config::from_toml_str("[elsewhere]\nport = 1\n"),
            Err(ConfigError::MissingTable)
        ));
        assert!(matches!(
            Config::from_toml_str("[ibcached]\nbuf_size = 4\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[ibcached]\ncq_depth = 8\nmax_send_wr = 16\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[ibcached]\ndevice = \"(\"\n"),
            Err(ConfigError::Device(_))
        ));
        assert!(matches!(
            Config::from_toml_str("[ibcached]\nbogus = true\n"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn disabled_gid_index() {
        let config = Config::from_toml_str("[ibcached]\ngid_index = { policy = \"disabled\" }\n").unwrap();
        assert_eq!(config.gid_index.resolve().unwrap(), None);
    }
}
