//! strata - hierarchical versioned document repository
//!
//! a filesystem store for nodes (resources and collections) carrying typed
//! properties and a linear revision history.
//!
//! # Core concepts
//!
//! - **Node**: a resource (content file) or collection (directory), addressed by path
//! - **Property**: a typed named value kept in the node's meta file
//! - **Revision**: an immutable snapshot of a resource created at checkin
//! - **Date index**: per-node directory tree for point-in-time revision lookup
//!
//! # Layout
//!
//! ```text
//! content/<split(path)>                                   live content
//! meta/<split(path)>.meta/meta                            live properties
//! meta/<split(path)>.meta/revisions/<split(rev)>/{content,meta}
//! meta/<split(path)>.meta/index_date_utc/Y/M/D/h/m/s/ms/id.txt
//! ```
//!
//! paths under configured prefixes are split into bounded-depth directories so
//! no directory grows without limit.
//!
//! # Example usage
//!
//! ```no_run
//! use strata::{NodeKind, Repository};
//! use std::path::Path;
//!
//! let repo = Repository::init(Path::new("/path/to/repo")).unwrap();
//! let doc = repo
//!     .root_node()
//!     .unwrap()
//!     .add_node("doc.txt", NodeKind::Resource)
//!     .unwrap();
//!
//! doc.checkout("alice").unwrap();
//! doc.write_content(b"hello").unwrap();
//! let revision = doc.checkin("first draft").unwrap();
//!
//! let at = revision.creation_date().unwrap();
//! assert_eq!(doc.revision_at(at).unwrap(), Some(revision));
//! ```

mod config;
mod error;
mod indexer;
mod listing;
mod node;
mod repo;
mod revision;
mod split;
mod versioning;

pub mod fs;
pub mod index;
pub mod meta;
pub mod types;

pub use config::{Config, DateIndexKind};
pub use error::{Error, ErrorKind, Result};
pub use index::{DateIndex, Direction, DirectoryDateIndex, IterStart, RevisionIter, ScanDateIndex};
pub use indexer::Indexer;
pub use listing::render as render_listing;
pub use node::{Node, NodeWriter};
pub use repo::{normalize_path, Repository};
pub use revision::Revision;
pub use split::SplitConfig;
pub use types::{names, NodeKind, Property, PropertyMap, PropertyType, PropertyValue};
