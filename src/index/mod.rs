//! point-in-time lookup of revisions
//!
//! a date index answers "which revision was current at time T" for one node.
//! the directory implementation keeps an on-disk tree keyed by UTC date fields;
//! the scan implementation keeps nothing and walks the revision tree instead.

mod directory;
mod iter;
mod scan;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::revision::Revision;

pub use directory::DirectoryDateIndex;
pub use iter::{Direction, IterStart, RevisionIter};
pub use scan::ScanDateIndex;

/// revision lookup by date for a single node
pub trait DateIndex {
    /// true if the index is present (always true for indexes without storage)
    fn exists(&self) -> bool;

    /// create the index from the node's revisions if it is absent
    fn build(&self) -> Result<()>;

    /// register a revision under its creation date
    fn add_revision(&self, name: &str) -> Result<()>;

    /// unregister a revision
    fn delete_revision(&self, name: &str) -> Result<()>;

    /// the revision current at `date`: the youngest one created at or before it
    fn revision_at(&self, date: DateTime<Utc>) -> Result<Option<Revision>>;

    /// the youngest revision created strictly before `date`
    fn revision_older_than(&self, date: DateTime<Utc>) -> Result<Option<Revision>>;

    /// the oldest revision created strictly after `date`
    fn revision_younger_than(&self, date: DateTime<Utc>) -> Result<Option<Revision>>;

    fn most_recent_revision(&self) -> Result<Option<Revision>>;

    fn oldest_revision(&self) -> Result<Option<Revision>>;
}
