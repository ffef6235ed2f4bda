//! SGW Configuration
//!
//! YAML configuration for the four local interfaces, the two GTP-C peers,
//! pool sizes and buffering timers. Every section has defaults so a partial
//! file is accepted.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/nextgcore/sgw.yaml";

/// Default maximum number of sessions
pub const MAX_NUM_OF_SESS: u64 = 1024;
/// Default maximum number of bearers
pub const MAX_NUM_OF_BEARER: u64 = 4096;

pub const GTPV2_C_UDP_PORT: u16 = 2123;
pub const GTPV1_U_UDP_PORT: u16 = 2152;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Local or remote UDP endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConf {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl EndpointConf {
    pub const fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.addr, self.port)
    }
}

const SGW_ADDR: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConf {
    /// trace, debug, info, warn, error
    pub level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GtpcConf {
    pub s11: EndpointConf,
    pub s5c: EndpointConf,
}

impl Default for GtpcConf {
    fn default() -> Self {
        Self {
            s11: EndpointConf::new(SGW_ADDR, GTPV2_C_UDP_PORT),
            s5c: EndpointConf::new(SGW_ADDR, GTPV2_C_UDP_PORT + 1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GtpuConf {
    pub s1u: EndpointConf,
    pub s5u: EndpointConf,
}

impl Default for GtpuConf {
    fn default() -> Self {
        Self {
            s1u: EndpointConf::new(SGW_ADDR, GTPV1_U_UDP_PORT),
            s5u: EndpointConf::new(SGW_ADDR, GTPV1_U_UDP_PORT + 1),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SgwNodeConf {
    pub gtpc: GtpcConf,
    pub gtpu: GtpuConf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxConf {
    pub sess: u64,
    pub bearer: u64,
}

impl Default for MaxConf {
    fn default() -> Self {
        Self {
            sess: MAX_NUM_OF_SESS,
            bearer: MAX_NUM_OF_BEARER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConf {
    /// Seconds buffered packets wait for paging to complete
    pub buffer_expiry: u64,
}

impl Default for TimeConf {
    fn default() -> Self {
        Self { buffer_expiry: 10 }
    }
}

impl TimeConf {
    pub fn buffer_expiry(&self) -> Duration {
        Duration::from_secs(self.buffer_expiry)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConf {
    pub capacity: usize,
}

impl Default for QueueConf {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// SGW configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SgwConfig {
    pub logger: LoggerConf,
    pub sgw: SgwNodeConf,
    /// MME S11 GTP-C peer
    pub mme: EndpointConf,
    /// PGW S5-C GTP-C peer
    pub pgw: EndpointConf,
    pub max: MaxConf,
    pub time: TimeConf,
    pub queue: QueueConf,
}

impl Default for SgwConfig {
    fn default() -> Self {
        Self {
            logger: LoggerConf::default(),
            sgw: SgwNodeConf::default(),
            mme: EndpointConf::new(Ipv4Addr::new(127, 0, 0, 1), GTPV2_C_UDP_PORT),
            pgw: EndpointConf::new(Ipv4Addr::new(127, 0, 0, 3), GTPV2_C_UDP_PORT),
            max: MaxConf::default(),
            time: TimeConf::default(),
            queue: QueueConf::default(),
        }
    }
}

impl SgwConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let conf: SgwConfig = serde_yaml::from_str(yaml)?;
        conf.validate()?;
        Ok(conf)
    }

    /// Read, parse and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max.sess == 0 || self.max.bearer == 0 {
            return Err(ConfigError::Validation(
                "`max.sess` and `max.bearer` must be non-zero".to_string(),
            ));
        }
        if self.max.sess > u32::MAX as u64 || self.max.bearer > u32::MAX as u64 {
            return Err(ConfigError::Validation(format!(
                "pool sizes are limited to the TEID space ({})",
                u32::MAX
            )));
        }
        // Each session owns at least its default bearer
        if self.max.bearer < self.max.sess {
            return Err(ConfigError::Validation(format!(
                "`max.bearer` ({}) must not be smaller than `max.sess` ({})",
                self.max.bearer, self.max.sess
            )));
        }
        if self.queue.capacity == 0 {
            return Err(ConfigError::Validation(
                "`queue.capacity` must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
