use chrono::{DateTime, Duration, Utc};

use super::DateIndex;
use crate::error::{Error, Result};
use crate::revision::Revision;

/// walk order of a [`RevisionIter`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// towards older revisions
    Backward,
    /// towards younger revisions
    Forward,
}

/// first revision produced by a [`RevisionIter`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IterStart {
    MostRecent,
    Oldest,
    /// the revision current at the date when walking backward, the first one
    /// created at or after it when walking forward
    At(DateTime<Utc>),
}

/// lazy walk over a node's revisions by creation date
///
/// each step is one index lookup; revisions added or removed while iterating
/// are seen or skipped depending on where the walk is.
pub struct RevisionIter {
    index: Box<dyn DateIndex>,
    direction: Direction,
    next: Option<Revision>,
    error: Option<Error>,
}

impl RevisionIter {
    pub fn new(index: Box<dyn DateIndex>, start: IterStart, direction: Direction) -> Self {
        let first = match (start, direction) {
            (IterStart::MostRecent, _) => index.most_recent_revision(),
            (IterStart::Oldest, _) => index.oldest_revision(),
            (IterStart::At(date), Direction::Backward) => index.revision_at(date),
            (IterStart::At(date), Direction::Forward) => {
                index.revision_younger_than(date - Duration::milliseconds(1))
            }
        };
        let (next, error) = match first {
            Ok(next) => (next, None),
            Err(e) => (None, Some(e)),
        };
        Self {
            index,
            direction,
            next,
            error,
        }
    }

    fn step(&self, current: &Revision) -> Result<Option<Revision>> {
        let date = current.creation_date()?;
        match self.direction {
            Direction::Backward => self.index.revision_older_than(date),
            Direction::Forward => self.index.revision_younger_than(date),
        }
    }
}

impl Iterator for RevisionIter {
    type Item = Result<Revision>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.error.take() {
            return Some(Err(e));
        }
        let current = self.next.take()?;
        match self.step(&current) {
            Ok(next) => self.next = next,
            // report after yielding the current revision
            Err(e) => self.error = Some(e),
        }
        Some(Ok(current))
    }
}
