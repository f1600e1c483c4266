//! Top-level node resolution, consumed by the node-lifecycle controller.
//!
//! A node name or provider identifier goes in; normalized addresses,
//! existence, instance type, or power state comes out. Names are classified
//! syntactically first, and the other backend is only consulted on a
//! definitive not-found. Any other failure surfaces immediately.

use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::api::cache::SecondaryCache;
use crate::api::primary::PrimaryClient;
use crate::api::secondary::SecondaryClient;
use crate::api::{PrimaryApi, PrimaryServer, RateLimitGate, SecondaryServer};
use crate::config::{AddressFamily, ResolverConfig};
use crate::credentials::{self, CredentialError, CredentialStore, CredentialWatcher, WatcherError};
use crate::error::ApiError;
use crate::node::NodeMeta;
use crate::provider_id::{self, Backend, ProviderId};

/// Reserved name prefix of secondary-backend nodes. A name without it is
/// classified as primary.
pub const SECONDARY_NAME_PREFIX: &str = "bm-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Hostname,
    ExternalIp,
    InternalIp,
}

/// One normalized address of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddress {
    pub kind: AddressKind,
    pub address: String,
}

impl NodeAddress {
    fn new(kind: AddressKind, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
        }
    }
}

/// A server found on either backend.
enum ServerRecord {
    Primary(PrimaryServer),
    Secondary(SecondaryServer),
}

/// Resolves node identity across the two backend inventories.
///
/// All shared mutable state (credential slots, cache snapshot, rate-limit
/// gate) hangs off this one object; independent resolvers in the same
/// process do not interfere.
pub struct NodeResolver {
    primary: Arc<dyn PrimaryApi>,
    secondary: Option<Arc<SecondaryCache>>,
    credentials: Arc<CredentialStore>,
    rate_limits: RateLimitGate,
    address_family: AddressFamily,
    private_network: Option<String>,
    secret_directory: PathBuf,
}

impl NodeResolver {
    /// Wire up a resolver with explicit clients. Used directly by tests;
    /// production goes through [`NodeResolver::from_config`].
    pub fn new(
        primary: Arc<dyn PrimaryApi>,
        secondary: Option<Arc<SecondaryCache>>,
        credentials: Arc<CredentialStore>,
        config: &ResolverConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            credentials,
            rate_limits: RateLimitGate::default(),
            address_family: config.address_family,
            private_network: config.private_network.clone(),
            secret_directory: config.secret_directory.clone(),
        }
    }

    /// Load initial credentials and construct the HTTP clients.
    ///
    /// The primary token is mandatory. The secondary backend stays absent
    /// when neither the secret directory nor the environment provides its
    /// credentials.
    pub fn from_config(config: ResolverConfig) -> Result<Self, CredentialError> {
        let store = Arc::new(CredentialStore::new());
        credentials::reload_primary(&store, &config.secret_directory)?;
        if let Some(creds) = credentials::load_secondary_startup(&config.secret_directory)? {
            store.apply_secondary_credentials(creds);
        }

        let primary: Arc<dyn PrimaryApi> = Arc::new(PrimaryClient::new(store.clone(), &config));
        let secondary = store.secondary_credentials().is_some().then(|| {
            let client = Arc::new(SecondaryClient::new(store.clone(), &config));
            Arc::new(SecondaryCache::new(client, config.cache_ttl))
        });

        Ok(Self::new(primary, secondary, store, &config))
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn secondary_cache(&self) -> Option<&Arc<SecondaryCache>> {
        self.secondary.as_ref()
    }

    /// Start hot-reloading credentials from the secret directory.
    pub fn watch_credentials(&self, debounce: Duration) -> Result<CredentialWatcher, WatcherError> {
        CredentialWatcher::start(
            self.secret_directory.clone(),
            self.credentials.clone(),
            self.secondary.clone(),
            debounce,
        )
    }

    /// Addresses of a node, located by name with cross-backend fallback.
    pub async fn addresses(&self, node: &NodeMeta) -> Result<Vec<NodeAddress>, ApiError> {
        tracing::debug!(node = %node.name, "resolving node addresses by name");
        match self.server_by_name(node).await? {
            ServerRecord::Primary(server) => Ok(self.primary_addresses(&server).await),
            ServerRecord::Secondary(server) => Ok(self.secondary_addresses(&server)),
        }
    }

    /// Addresses of a node, located by provider identifier.
    pub async fn addresses_by_provider_id(
        &self,
        node: &NodeMeta,
        provider_id: &str,
    ) -> Result<Vec<NodeAddress>, ApiError> {
        tracing::debug!(node = %node.name, provider_id, "resolving node addresses by provider id");
        match self.server_by_provider_id(node, provider_id).await? {
            ServerRecord::Primary(server) => Ok(self.primary_addresses(&server).await),
            ServerRecord::Secondary(server) => Ok(self.secondary_addresses(&server)),
        }
    }

    /// Backend-reported instance type, located by name.
    pub async fn instance_type(&self, node: &NodeMeta) -> Result<String, ApiError> {
        match self.server_by_name(node).await? {
            ServerRecord::Primary(server) => Ok(server.server_type.name),
            ServerRecord::Secondary(server) => Ok(server.instance_type()),
        }
    }

    /// Backend-reported instance type, located by provider identifier.
    pub async fn instance_type_by_provider_id(
        &self,
        node: &NodeMeta,
        provider_id: &str,
    ) -> Result<String, ApiError> {
        match self.server_by_provider_id(node, provider_id).await? {
            ServerRecord::Primary(server) => Ok(server.server_type.name),
            ServerRecord::Secondary(server) => Ok(server.instance_type()),
        }
    }

    /// Backend-local instance id of a node, located by name.
    pub async fn instance_id(&self, node: &NodeMeta) -> Result<String, ApiError> {
        match self.server_by_name(node).await? {
            ServerRecord::Primary(server) => Ok(server.id.to_string()),
            ServerRecord::Secondary(server) => {
                Ok(format!("{SECONDARY_NAME_PREFIX}{}", server.id))
            }
        }
    }

    /// Provider identifier for a node, derived from whichever backend owns
    /// it. An identifier the node already carries is returned verbatim.
    pub async fn provider_id(&self, node: &NodeMeta) -> Result<String, ApiError> {
        match self.server_by_name(node).await? {
            ServerRecord::Primary(server) => Ok(provider_id::from_primary_id(server.id)),
            ServerRecord::Secondary(server) => {
                provider_id::for_node(node, server.id).map_err(Into::into)
            }
        }
    }

    /// Whether a server with this node's name exists on either backend.
    pub async fn exists(&self, node: &NodeMeta) -> Result<bool, ApiError> {
        match self.server_by_name(node).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Whether the server behind this node's name is shut down.
    pub async fn is_shut_down(&self, node: &NodeMeta) -> Result<bool, ApiError> {
        match self.server_by_name(node).await? {
            ServerRecord::Primary(server) => Ok(server.is_off()),
            ServerRecord::Secondary(_) => Ok(false),
        }
    }

    /// Whether the server behind a provider identifier still exists.
    ///
    /// Independent of the power-state check; each is retryable on its own.
    pub async fn exists_by_provider_id(
        &self,
        node: &NodeMeta,
        provider_id: &str,
    ) -> Result<bool, ApiError> {
        let decoded = ProviderId::decode(provider_id)?;
        match decoded.backend {
            Backend::Primary => Ok(self.primary.server_by_id(decoded.id).await?.is_some()),
            Backend::Secondary => Ok(self.secondary_by_id(node, decoded.id).await?.is_some()),
        }
    }

    /// Whether the server behind a provider identifier is shut down. The
    /// secondary backend has no shutdown concept and always reports `false`.
    pub async fn is_shut_down_by_provider_id(&self, provider_id: &str) -> Result<bool, ApiError> {
        let decoded = ProviderId::decode(provider_id)?;
        match decoded.backend {
            Backend::Primary => Ok(self
                .primary
                .server_by_id(decoded.id)
                .await?
                .map(|s| s.is_off())
                .unwrap_or(false)),
            Backend::Secondary => Ok(false),
        }
    }

    async fn server_by_name(&self, node: &NodeMeta) -> Result<ServerRecord, ApiError> {
        match classify_name(&node.name)? {
            Backend::Primary => {
                if let Some(server) = self.primary.server_by_name(&node.name).await? {
                    return Ok(ServerRecord::Primary(server));
                }
                // Definitive not-found: the one case that falls through.
                match self.secondary_by_name(&node.name).await? {
                    Some(server) => Ok(ServerRecord::Secondary(server)),
                    None => Err(ApiError::NotFound),
                }
            }
            Backend::Secondary => {
                if let Some(server) = self.secondary_by_name(&node.name).await? {
                    return Ok(ServerRecord::Secondary(server));
                }
                match self.primary.server_by_name(&node.name).await? {
                    Some(server) => Ok(ServerRecord::Primary(server)),
                    None => Err(ApiError::NotFound),
                }
            }
        }
    }

    /// The identifier names the owning backend, so there is no fallback on
    /// this path.
    async fn server_by_provider_id(
        &self,
        node: &NodeMeta,
        provider_id: &str,
    ) -> Result<ServerRecord, ApiError> {
        let decoded = ProviderId::decode(provider_id)?;
        match decoded.backend {
            Backend::Primary => match self.primary.server_by_id(decoded.id).await? {
                Some(server) => Ok(ServerRecord::Primary(server)),
                None => Err(ApiError::NotFound),
            },
            Backend::Secondary => match self.secondary_by_id(node, decoded.id).await? {
                Some(server) => Ok(ServerRecord::Secondary(server)),
                None => Err(ApiError::NotFound),
            },
        }
    }

    async fn secondary_by_name(&self, node_name: &str) -> Result<Option<SecondaryServer>, ApiError> {
        let cache = self.secondary_cache_checked()?;
        self.rate_limits.check(node_name)?;
        let list = match cache.list().await {
            Ok(list) => list,
            Err(err) => {
                self.rate_limits.observe(node_name, &err);
                return Err(err);
            }
        };
        Ok(list.into_iter().find(|s| s.name == node_name))
    }

    async fn secondary_by_id(
        &self,
        node: &NodeMeta,
        id: i64,
    ) -> Result<Option<SecondaryServer>, ApiError> {
        if node.name.is_empty() {
            return Err(ApiError::malformed(
                "secondary/get-server-by-id",
                "node name is empty",
            ));
        }
        let cache = self.secondary_cache_checked()?;
        self.rate_limits.check(&node.name)?;
        let server = match cache.get(id).await {
            Ok(server) => server,
            Err(err) => {
                self.rate_limits.observe(&node.name, &err);
                return Err(err);
            }
        };
        // A server whose name no longer matches was re-assigned and does
        // not belong to this node anymore.
        Ok(server.filter(|s| s.name == node.name))
    }

    fn secondary_cache_checked(&self) -> Result<&Arc<SecondaryCache>, ApiError> {
        self.secondary.as_ref().ok_or(ApiError::NotConfigured {
            backend: "secondary",
        })
    }

    async fn primary_addresses(&self, server: &PrimaryServer) -> Vec<NodeAddress> {
        let mut addresses = vec![NodeAddress::new(AddressKind::Hostname, &server.name)];

        if self.address_family.wants_ipv4() {
            if let Some(ipv4) = &server.public_net.ipv4 {
                addresses.push(NodeAddress::new(AddressKind::ExternalIp, ipv4.ip.to_string()));
            }
        }
        if self.address_family.wants_ipv6() {
            if let Some(ipv6) = &server.public_net.ipv6 {
                if let Some(host) = ipv6_host_address(&ipv6.ip) {
                    addresses.push(NodeAddress::new(AddressKind::ExternalIp, host.to_string()));
                }
            }
        }

        // Best effort: a network that cannot be resolved means no internal
        // address, not a failed resolution.
        if let Some(network_ref) = &self.private_network {
            match self.primary.network(network_ref).await {
                Ok(Some(network)) => {
                    for private_net in &server.private_net {
                        if private_net.network == network.id {
                            addresses.push(NodeAddress::new(
                                AddressKind::InternalIp,
                                private_net.ip.clone(),
                            ));
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::debug!(network = %network_ref, error = %err, "private network lookup failed");
                }
            }
        }

        addresses
    }

    fn secondary_addresses(&self, server: &SecondaryServer) -> Vec<NodeAddress> {
        let mut addresses = vec![NodeAddress::new(AddressKind::Hostname, &server.name)];

        if self.address_family.wants_ipv4() {
            addresses.push(NodeAddress::new(AddressKind::ExternalIp, server.ipv4.clone()));
        }
        if self.address_family.wants_ipv6() {
            // For an announced network of 2a01:f48:111:4221:: the instance
            // address is 2a01:f48:111:4221::1.
            addresses.push(NodeAddress::new(
                AddressKind::ExternalIp,
                format!("{}1", server.ipv6_network),
            ));
        }

        addresses
    }
}

/// Cheap syntactic backend classification of a node name. An empty name
/// matches neither convention and is rejected outright.
fn classify_name(name: &str) -> Result<Backend, ApiError> {
    if name.is_empty() {
        return Err(ApiError::malformed(
            "resolver/classify-name",
            "node name is empty",
        ));
    }
    if name.starts_with(SECONDARY_NAME_PREFIX) {
        Ok(Backend::Secondary)
    } else {
        Ok(Backend::Primary)
    }
}

/// For a given IPv6 network of `2001:db8:1234::/64`, the instance address
/// is `2001:db8:1234::1`.
fn ipv6_host_address(network: &str) -> Option<Ipv6Addr> {
    let prefix = network.split('/').next()?;
    let ip: Ipv6Addr = prefix.parse().ok()?;
    let mut octets = ip.octets();
    octets[15] |= 0x01;
    Some(Ipv6Addr::from(octets))
}
