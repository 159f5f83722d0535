use chrono::{DateTime, Utc};

use super::DateIndex;
use crate::error::Result;
use crate::node::Node;
use crate::revision::Revision;

/// date index without storage: every lookup walks the node's revisions
///
/// linear in the number of revisions; useful for nodes with few revisions and
/// as a reference for the directory index.
pub struct ScanDateIndex {
    node: Node,
}

impl ScanDateIndex {
    pub fn new(node: Node) -> Self {
        Self { node }
    }

    /// all revisions with their creation dates, oldest first
    fn dated(&self) -> Result<Vec<(DateTime<Utc>, Revision)>> {
        let mut dated = Vec::new();
        for name in self.node.revision_names()? {
            let revision = self.node.revision(&name)?;
            dated.push((revision.creation_date()?, revision));
        }
        // names are numerically sorted already; dates normally agree
        dated.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(dated)
    }

    fn youngest(&self, keep: impl Fn(&DateTime<Utc>) -> bool) -> Result<Option<Revision>> {
        Ok(self
            .dated()?
            .into_iter()
            .rev()
            .find(|(date, _)| keep(date))
            .map(|(_, revision)| revision))
    }

    fn oldest(&self, keep: impl Fn(&DateTime<Utc>) -> bool) -> Result<Option<Revision>> {
        Ok(self
            .dated()?
            .into_iter()
            .find(|(date, _)| keep(date))
            .map(|(_, revision)| revision))
    }
}

impl DateIndex for ScanDateIndex {
    fn exists(&self) -> bool {
        true
    }

    fn build(&self) -> Result<()> {
        Ok(())
    }

    fn add_revision(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn delete_revision(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn revision_at(&self, date: DateTime<Utc>) -> Result<Option<Revision>> {
        self.youngest(|created| *created <= date)
    }

    fn revision_older_than(&self, date: DateTime<Utc>) -> Result<Option<Revision>> {
        self.youngest(|created| *created < date)
    }

    fn revision_younger_than(&self, date: DateTime<Utc>) -> Result<Option<Revision>> {
        self.oldest(|created| *created > date)
    }

    fn most_recent_revision(&self) -> Result<Option<Revision>> {
        self.youngest(|_| true)
    }

    fn oldest_revision(&self) -> Result<Option<Revision>> {
        self.oldest(|_| true)
    }
}
