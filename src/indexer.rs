//! hooks for an external search indexer
//!
//! the repository calls these after writes when `auto_index` is enabled. failures
//! are logged and never fail the write that triggered them.

use tracing::warn;

use crate::error::Result;
use crate::node::Node;
use crate::types::Property;

/// receiver of content and property change notifications
pub trait Indexer: Send + Sync {
    /// (re)index a node's content
    fn index(&self, node: &Node) -> Result<()>;

    /// (re)index one property of a node
    fn index_property(&self, node: &Node, property: &Property) -> Result<()>;

    /// drop a node from the index
    fn remove_from_index(&self, node: &Node) -> Result<()>;

    /// drop one property of a node from the index
    fn remove_property_from_index(&self, node: &Node, name: &str) -> Result<()>;
}

/// what happened to the node, for `notify`
pub(crate) enum Change<'a> {
    Content,
    Property(&'a Property),
    Removed,
    PropertyRemoved(&'a str),
}

/// forward a change to the node's indexer, if any, swallowing errors
pub(crate) fn notify(node: &Node, change: Change<'_>) {
    let Some(indexer) = node.repository().indexer() else {
        return;
    };
    let result = match change {
        Change::Content => indexer.index(node),
        Change::Property(property) => indexer.index_property(node, property),
        Change::Removed => indexer.remove_from_index(node),
        Change::PropertyRemoved(name) => indexer.remove_property_from_index(node, name),
    };
    if let Err(e) = result {
        warn!(path = node.path(), error = %e, "indexer notification failed");
    }
}
