//! Startup configuration.
//!
//! Everything is consumed once at construction time; credentials are the
//! only input that changes while the process runs.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const ADDRESS_FAMILY_ENV: &str = "ADDRESS_FAMILY";
const PRIVATE_NETWORK_ENV: &str = "PRIVATE_NETWORK";
const SECONDARY_BASE_URL_ENV: &str = "SECONDARY_BASE_URL";
const CACHE_TTL_ENV: &str = "CACHE_TTL_SECONDS";
const SECRET_DIRECTORY_ENV: &str = "SECRET_DIRECTORY";

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_SECRET_DIRECTORY: &str = "/etc/node-resolver/secret";

/// Which address families the resolver reports for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFamily {
    #[default]
    DualStack,
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "dualstack" => Ok(AddressFamily::DualStack),
            "ipv4" => Ok(AddressFamily::Ipv4),
            "ipv6" => Ok(AddressFamily::Ipv6),
            _ => Err(ConfigError::InvalidAddressFamily(s.to_string())),
        }
    }

    pub fn wants_ipv4(self) -> bool {
        matches!(self, AddressFamily::Ipv4 | AddressFamily::DualStack)
    }

    pub fn wants_ipv6(self) -> bool {
        matches!(self, AddressFamily::Ipv6 | AddressFamily::DualStack)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid address family {0:?}, expected ipv4, ipv6 or dualstack")]
    InvalidAddressFamily(String),

    #[error("invalid value {value:?} for {var}: expected whole seconds")]
    InvalidDuration { var: &'static str, value: String },
}

/// Resolver configuration, consumed at startup.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Address families reported for each node.
    pub address_family: AddressFamily,
    /// Optional private network; when set, primary servers attached to it
    /// additionally report their internal address.
    pub private_network: Option<String>,
    /// Override for the secondary backend's base URL (testing).
    pub secondary_base_url: Option<String>,
    /// Maximum age of the cached secondary listing.
    pub cache_ttl: Duration,
    /// Directory holding the mounted credential files.
    pub secret_directory: PathBuf,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            address_family: AddressFamily::default(),
            private_network: None,
            secondary_base_url: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            secret_directory: PathBuf::from(DEFAULT_SECRET_DIRECTORY),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ResolverConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(family) = std::env::var(ADDRESS_FAMILY_ENV) {
            config.address_family = AddressFamily::parse(&family)?;
        }
        if let Ok(network) = std::env::var(PRIVATE_NETWORK_ENV) {
            if !network.is_empty() {
                config.private_network = Some(network);
            }
        }
        if let Ok(url) = std::env::var(SECONDARY_BASE_URL_ENV) {
            if !url.is_empty() {
                config.secondary_base_url = Some(url);
            }
        }
        if let Ok(ttl) = std::env::var(CACHE_TTL_ENV) {
            let secs: u64 = ttl.parse().map_err(|_| ConfigError::InvalidDuration {
                var: CACHE_TTL_ENV,
                value: ttl.clone(),
            })?;
            if secs > 0 {
                config.cache_ttl = Duration::from_secs(secs);
            }
        }
        if let Ok(dir) = std::env::var(SECRET_DIRECTORY_ENV) {
            if !dir.is_empty() {
                config.secret_directory = PathBuf::from(dir);
            }
        }

        Ok(config)
    }
}
