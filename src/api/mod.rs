//! Backend inventory clients, unified behind one lookup contract.
//!
//! Two backends exist by design and the set is closed: the primary
//! (virtualized) inventory and the optional secondary (bare-metal) one.
//! The traits here are seams for tests, not extension points.

pub mod cache;
pub mod primary;
pub mod secondary;

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;

use crate::error::ApiError;

/// One virtualized server, as reported by the primary backend.
#[derive(Debug, Clone, Deserialize)]
pub struct PrimaryServer {
    pub id: i64,
    pub name: String,
    /// Power state; `"off"` is the only state reported as shut down.
    pub status: String,
    pub public_net: PublicNet,
    #[serde(default)]
    pub private_net: Vec<PrivateNet>,
    pub server_type: ServerType,
}

impl PrimaryServer {
    pub fn is_off(&self) -> bool {
        self.status == "off"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublicNet {
    pub ipv4: Option<PublicIpv4>,
    pub ipv6: Option<PublicIpv6>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublicIpv4 {
    pub ip: Ipv4Addr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublicIpv6 {
    /// Announced network in CIDR notation, e.g. `2001:db8:1234::/64`.
    pub ip: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrivateNet {
    pub network: i64,
    pub ip: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerType {
    pub name: String,
}

/// A private network on the primary backend.
#[derive(Debug, Clone, Deserialize)]
pub struct PrimaryNetwork {
    pub id: i64,
    pub name: String,
}

/// One physical server, as reported by the secondary backend.
///
/// The secondary backend has no shutdown concept; a listed server is
/// always powered on.
#[derive(Debug, Clone, Deserialize)]
pub struct SecondaryServer {
    #[serde(rename = "server_number")]
    pub id: i64,
    #[serde(rename = "server_name")]
    pub name: String,
    #[serde(rename = "server_ip")]
    pub ipv4: String,
    /// Announced IPv6 network prefix string, e.g. `2a01:f48:111:4221::`.
    #[serde(rename = "server_ipv6_net")]
    pub ipv6_network: String,
    pub product: String,
    /// Datacenter code, e.g. `FSN1-DC14`.
    pub dc: String,
}

impl SecondaryServer {
    /// Zone code: the first four characters of the datacenter code,
    /// lowercased.
    pub fn zone(&self) -> String {
        let end = self
            .dc
            .char_indices()
            .nth(4)
            .map(|(i, _)| i)
            .unwrap_or(self.dc.len());
        self.dc[..end].to_lowercase()
    }

    /// Region the server's zone belongs to.
    pub fn region(&self) -> Result<&'static str, ApiError> {
        match self.zone().as_str() {
            "nbg1" | "fsn1" | "hel1" => Ok("eu-central"),
            "ash" => Ok("us-east"),
            zone => Err(ApiError::malformed(
                "secondary/region",
                format!("unknown zone {zone:?} for datacenter {:?}", self.dc),
            )),
        }
    }

    /// Product label sanitized for use as a label value: anything outside
    /// `[a-zA-Z0-9_.]` collapses to `-`, then `-_.` is trimmed.
    pub fn instance_type(&self) -> String {
        let mut out = String::with_capacity(self.product.len());
        let mut last_was_dash = false;
        for c in self.product.chars() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                out.push(c);
                last_was_dash = false;
            } else if !last_was_dash {
                out.push('-');
                last_was_dash = true;
            }
        }
        out.trim_matches(|c| matches!(c, '-' | '_' | '.')).to_string()
    }
}

/// Lookup contract of the primary backend. `Ok(None)` is a definitive
/// not-found; errors mean the call failed.
#[async_trait]
pub trait PrimaryApi: Send + Sync {
    async fn server_by_id(&self, id: i64) -> Result<Option<PrimaryServer>, ApiError>;
    async fn server_by_name(&self, name: &str) -> Result<Option<PrimaryServer>, ApiError>;
    async fn network(&self, id_or_name: &str) -> Result<Option<PrimaryNetwork>, ApiError>;
}

/// Lookup contract of the secondary backend: one full listing, nothing
/// finer-grained. The strict upstream rate limit is why all point lookups
/// go through the cache instead.
#[async_trait]
pub trait SecondaryApi: Send + Sync {
    async fn list_servers(&self) -> Result<Vec<SecondaryServer>, ApiError>;
}

/// Per-node short-circuit for the secondary backend's rate limit.
///
/// When a call for a node hits the rate limit, the next permitted time is
/// recorded here so that further calls for that node fail locally until it
/// passes, without burning another upstream request.
#[derive(Default)]
pub struct RateLimitGate {
    next_allowed: RwLock<HashMap<String, SystemTime>>,
}

impl RateLimitGate {
    /// Fail fast if a previous call for this node was rate limited and the
    /// embargo has not passed yet.
    pub fn check(&self, node_name: &str) -> Result<(), ApiError> {
        if let Some(&retry_after) = self.next_allowed.read().get(node_name) {
            if SystemTime::now() < retry_after {
                return Err(ApiError::RateLimited { retry_after });
            }
        }
        // Expired entries are dropped lazily on the next rate-limit hit.
        Ok(())
    }

    /// Record a rate-limit error observed for this node.
    pub fn observe(&self, node_name: &str, err: &ApiError) {
        if let ApiError::RateLimited { retry_after } = err {
            let mut map = self.next_allowed.write();
            let now = SystemTime::now();
            map.retain(|_, t| *t > now);
            map.insert(node_name.to_string(), *retry_after);
        }
    }
}
