//! Discovery-adapter contract
//!
//! The fixtures this crate builds exist to validate an external
//! resource-discovery library. That library's item shape and query
//! surface are a fixed contract, mirrored here so validation closures
//! can assert against it. Nothing in this module talks to a provider.

use crate::fault::RemoteError;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Separator for composite lookup keys.
pub const COMPOSITE_KEY_SEPARATOR: char = '/';

/// Deterministic composite key for resources without a single natural
/// key: parent and child names joined with a fixed separator.
pub fn composite_key(parent: &str, child: &str) -> String {
    format!("{parent}{COMPOSITE_KEY_SEPARATOR}{child}")
}

/// How a linked item is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryMethod {
    /// Direct lookup by unique attribute
    Get,
    /// Broader search in the target scope
    Search,
}

/// Directional impact flags on a relationship edge: whether
/// failure/change impact flows inbound from the link target, outbound to
/// it, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlastPropagation {
    pub inbound: bool,
    pub outbound: bool,
}

impl BlastPropagation {
    pub fn both() -> Self {
        BlastPropagation {
            inbound: true,
            outbound: true,
        }
    }

    pub fn inbound_only() -> Self {
        BlastPropagation {
            inbound: true,
            outbound: false,
        }
    }

    pub fn outbound_only() -> Self {
        BlastPropagation {
            inbound: false,
            outbound: true,
        }
    }
}

/// A query for an item linked to another item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedItemQuery {
    /// Target item type tag
    pub item_type: String,
    pub method: QueryMethod,
    /// Target scope string
    pub scope: String,
    pub propagation: BlastPropagation,
}

/// A typed item as the discovery adapter reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Item type tag
    pub item_type: String,
    pub scope: String,
    /// Name of the attribute that uniquely identifies this item
    pub unique_attribute: String,
    /// Its value, possibly a [`composite_key`]
    pub unique_attribute_value: String,
    pub linked_queries: Vec<LinkedItemQuery>,
}

/// Query surface of the external discovery adapter.
///
/// Implemented by the library under validation, consumed by scenario
/// validation closures. This contract is fixed; do not extend it here.
pub trait DiscoverySource: Send + Sync {
    fn get(
        &self,
        scope: &str,
        query: &str,
    ) -> impl Future<Output = Result<Item, RemoteError>> + Send;

    fn list(&self, scope: &str) -> impl Future<Output = Result<Vec<Item>, RemoteError>> + Send;

    fn search(
        &self,
        scope: &str,
        query: &str,
    ) -> impl Future<Output = Result<Vec<Item>, RemoteError>> + Send;
}
