//! The handful of node fields this crate consumes.
//!
//! The node-lifecycle controller owns the full node object; only the name,
//! the already-assigned provider identifier, and the annotation map cross
//! this boundary.

use std::collections::HashMap;

/// Metadata of one compute node, as handed in by the controller.
#[derive(Debug, Clone, Default)]
pub struct NodeMeta {
    pub name: String,
    /// Provider identifier already assigned to the node, if any.
    pub provider_id: Option<String>,
    pub annotations: HashMap<String, String>,
}

impl NodeMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}
