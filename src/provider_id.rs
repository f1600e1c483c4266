//! Provider identifier encoding and decoding.
//!
//! Decoding accepts every format that was ever written to a node. Dropping
//! a format would abandon the nodes still carrying it, so the prefix set
//! only ever grows.

use thiserror::Error;

use crate::node::NodeMeta;

/// Prefix for primary (virtualized) server identifiers.
///
/// MUST not change, existing nodes would no longer be recognized.
pub const PREFIX_PRIMARY: &str = "hcloud://";

/// Legacy prefix for secondary (bare-metal) server identifiers. No longer
/// produced by default, still decoded.
///
/// MUST not change, existing nodes would no longer be recognized.
pub const PREFIX_SECONDARY_LEGACY: &str = "hcloud://bm-";

/// Current prefix for secondary server identifiers.
pub const PREFIX_SECONDARY: &str = "hrobot://";

/// Node annotation selecting the prefix used when deriving a fresh
/// secondary identifier. Valid values are the two secondary prefixes.
pub const ID_PREFIX_ANNOTATION: &str = "node-lifecycle/bare-metal-provider-id-prefix";

/// Which inventory a server lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Virtualized fleet, bearer-token auth.
    Primary,
    /// Bare-metal fleet, basic auth, strict rate limit. Optional.
    Secondary,
}

/// Encoding style for secondary identifiers. Primary identifiers have a
/// single canonical form and ignore the style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdStyle {
    /// `hcloud://bm-<id>`, written by older deployments.
    #[default]
    Legacy,
    /// `hrobot://<id>`.
    Current,
}

/// A decoded provider identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderId {
    pub id: i64,
    pub backend: Backend,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProviderIdError {
    #[error("provider id {0:?} does not have one of the expected prefixes ({PREFIX_PRIMARY}, {PREFIX_SECONDARY_LEGACY}, {PREFIX_SECONDARY})")]
    UnknownPrefix(String),

    #[error("provider id {0:?} is missing a server id")]
    MissingId(String),

    #[error("unable to parse server id from provider id {0:?}")]
    MalformedId(String),

    #[error("value {value:?} of node {node:?} annotation {ID_PREFIX_ANNOTATION} is invalid, only {PREFIX_SECONDARY_LEGACY:?} and {PREFIX_SECONDARY:?} are supported")]
    InvalidPrefixAnnotation { node: String, value: String },
}

impl ProviderId {
    /// Parse a provider identifier in any format ever produced.
    pub fn decode(provider_id: &str) -> Result<Self, ProviderIdError> {
        // The current secondary prefix first, then the legacy one, which is
        // a textual superset of the primary prefix and must come before it.
        let (raw, backend) = if let Some(rest) = provider_id.strip_prefix(PREFIX_SECONDARY) {
            (rest, Backend::Secondary)
        } else if let Some(rest) = provider_id.strip_prefix(PREFIX_SECONDARY_LEGACY) {
            (rest, Backend::Secondary)
        } else if let Some(rest) = provider_id.strip_prefix(PREFIX_PRIMARY) {
            (rest, Backend::Primary)
        } else {
            return Err(ProviderIdError::UnknownPrefix(provider_id.to_string()));
        };

        if raw.is_empty() {
            return Err(ProviderIdError::MissingId(provider_id.to_string()));
        }

        let id: i64 = raw
            .parse()
            .map_err(|_| ProviderIdError::MalformedId(provider_id.to_string()))?;
        if id < 0 {
            return Err(ProviderIdError::MalformedId(provider_id.to_string()));
        }

        Ok(Self { id, backend })
    }

    /// Render the identifier. Injective in `(id, backend, style)` and always
    /// decodes back to the same `(id, backend)`.
    pub fn encode(&self, style: IdStyle) -> String {
        match (self.backend, style) {
            (Backend::Primary, _) => format!("{PREFIX_PRIMARY}{}", self.id),
            (Backend::Secondary, IdStyle::Legacy) => format!("{PREFIX_SECONDARY_LEGACY}{}", self.id),
            (Backend::Secondary, IdStyle::Current) => format!("{PREFIX_SECONDARY}{}", self.id),
        }
    }
}

/// Canonical identifier for a primary server.
pub fn from_primary_id(id: i64) -> String {
    ProviderId {
        id,
        backend: Backend::Primary,
    }
    .encode(IdStyle::default())
}

/// Identifier for a node backed by a secondary server.
///
/// Returns the node's already-assigned identifier verbatim if present; an
/// identifier is never re-derived once assigned. Otherwise derives one in
/// the style selected by the node's prefix annotation (legacy by default).
pub fn for_node(node: &NodeMeta, server_id: i64) -> Result<String, ProviderIdError> {
    if let Some(existing) = node.provider_id.as_deref() {
        if !existing.is_empty() {
            return Ok(existing.to_string());
        }
    }

    let style = match node.annotations.get(ID_PREFIX_ANNOTATION).map(String::as_str) {
        None => IdStyle::default(),
        Some(PREFIX_SECONDARY_LEGACY) => IdStyle::Legacy,
        Some(PREFIX_SECONDARY) => IdStyle::Current,
        Some(other) => {
            return Err(ProviderIdError::InvalidPrefixAnnotation {
                node: node.name.clone(),
                value: other.to_string(),
            })
        }
    };

    Ok(ProviderId {
        id: server_id,
        backend: Backend::Secondary,
    }
    .encode(style))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_primary() {
        assert_eq!(
            ProviderId::decode("hcloud://1234").unwrap(),
            ProviderId {
                id: 1234,
                backend: Backend::Primary
            }
        );
        assert_eq!(
            ProviderId::decode("hcloud://2251799813685247").unwrap(),
            ProviderId {
                id: 2251799813685247,
                backend: Backend::Primary
            }
        );
    }

    #[test]
    fn test_decode_secondary_all_formats() {
        for provider_id in ["hcloud://bm-4321", "hrobot://4321"] {
            assert_eq!(
                ProviderId::decode(provider_id).unwrap(),
                ProviderId {
                    id: 4321,
                    backend: Backend::Secondary
                },
                "format {provider_id}"
            );
        }
    }

    #[test]
    fn test_decode_missing_id() {
        assert_eq!(
            ProviderId::decode("hcloud://"),
            Err(ProviderIdError::MissingId("hcloud://".to_string()))
        );
        assert_eq!(
            ProviderId::decode("hcloud://bm-"),
            Err(ProviderIdError::MissingId("hcloud://bm-".to_string()))
        );
    }

    #[test]
    fn test_decode_malformed_id() {
        assert!(matches!(
            ProviderId::decode("hcloud://my-cloud"),
            Err(ProviderIdError::MalformedId(_))
        ));
        assert!(matches!(
            ProviderId::decode("hcloud://bm-my-robot"),
            Err(ProviderIdError::MalformedId(_))
        ));
        assert!(matches!(
            ProviderId::decode("hrobot://-5"),
            Err(ProviderIdError::MalformedId(_))
        ));
    }

    #[test]
    fn test_decode_unknown_prefix() {
        assert_eq!(
            ProviderId::decode("foobar/321"),
            Err(ProviderIdError::UnknownPrefix("foobar/321".to_string()))
        );
    }

    #[test]
    fn test_encode_primary_is_canonical() {
        let id = ProviderId {
            id: 1234,
            backend: Backend::Primary,
        };
        assert_eq!(id.encode(IdStyle::Legacy), "hcloud://1234");
        assert_eq!(id.encode(IdStyle::Current), "hcloud://1234");
        assert_eq!(from_primary_id(1234), "hcloud://1234");
    }

    #[test]
    fn test_round_trip_all_styles() {
        for backend in [Backend::Primary, Backend::Secondary] {
            for style in [IdStyle::Legacy, IdStyle::Current] {
                for id in [0, 1, 4321, 2251799813685247] {
                    let original = ProviderId { id, backend };
                    assert_eq!(
                        ProviderId::decode(&original.encode(style)).unwrap(),
                        original
                    );
                }
            }
        }
    }

    #[test]
    fn test_for_node_keeps_assigned_id() {
        let mut node = NodeMeta::named("bm-node-1");
        node.provider_id = Some("hcloud://bm-999".to_string());
        assert_eq!(for_node(&node, 321).unwrap(), "hcloud://bm-999");
    }

    #[test]
    fn test_for_node_defaults_to_legacy() {
        let node = NodeMeta::named("bm-node-1");
        assert_eq!(for_node(&node, 321).unwrap(), "hcloud://bm-321");
    }

    #[test]
    fn test_for_node_honors_annotation() {
        let mut node = NodeMeta::named("bm-node-2");
        node.annotations.insert(
            ID_PREFIX_ANNOTATION.to_string(),
            PREFIX_SECONDARY.to_string(),
        );
        assert_eq!(for_node(&node, 321).unwrap(), "hrobot://321");
    }

    #[test]
    fn test_for_node_rejects_unknown_annotation_value() {
        let mut node = NodeMeta::named("bm-node-3");
        node.annotations
            .insert(ID_PREFIX_ANNOTATION.to_string(), "bad://".to_string());
        assert!(matches!(
            for_node(&node, 321),
            Err(ProviderIdError::InvalidPrefixAnnotation { .. })
        ));
    }
}
