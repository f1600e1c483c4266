//! Node identity resolution across two heterogeneous server fleets.
//!
//! Given a node name or provider identifier, this crate determines which
//! backend inventory owns the node — the virtualized (primary) fleet or
//! the bare-metal (secondary) fleet — and derives its normalized
//! attributes: addresses, existence, instance type, and power state.
//!
//! Three pieces carry the weight:
//!
//! - [`provider_id`]: a reversible identifier codec that still decodes
//!   every historical encoding.
//! - [`api::cache`]: a TTL-bounded cache shielding the rate-limited
//!   secondary inventory from per-request load.
//! - [`credentials`]: live credential slots hot-reloaded from an
//!   atomically swapped secret directory, without restarts and without
//!   torn reads.

pub mod api;
pub mod config;
pub mod credentials;
pub mod error;
pub mod node;
pub mod provider_id;
pub mod resolver;

pub use config::{AddressFamily, ConfigError, ResolverConfig};
pub use credentials::{CredentialError, CredentialStore, CredentialWatcher, SecondaryCredentials};
pub use error::ApiError;
pub use node::NodeMeta;
pub use provider_id::{Backend, IdStyle, ProviderId, ProviderIdError};
pub use resolver::{AddressKind, NodeAddress, NodeResolver};
