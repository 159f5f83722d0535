use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use tracing::{debug, warn};

use super::DateIndex;
use crate::error::{Error, IoResultExt, Result};
use crate::fs::{prune_empty_dirs, write_atomic};
use crate::node::Node;
use crate::revision::Revision;

/// name of the index directory inside a node's meta directory
pub const INDEX_DIR: &str = "index_date_utc";

/// marker file naming the revision at the bottom of each date path
const MARKER: &str = "id.txt";

/// zero-padded widths of year, month, day, hour, minute, second, millisecond
const WIDTHS: [usize; 7] = [4, 2, 2, 2, 2, 2, 3];

/// depth of the directory holding the marker file
const LEAF: usize = WIDTHS.len();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Seek {
    /// at or before the target, youngest first
    Older,
    /// at or after the target, oldest first
    Newer,
}

/// on-disk index: `YYYY/MM/DD/HH/mm/ss/SSS/id.txt` below the node's meta directory
///
/// sibling names are zero-padded to a fixed width per level, so string order is
/// numeric order.
pub struct DirectoryDateIndex {
    node: Node,
    root: PathBuf,
    strict: bool,
}

impl DirectoryDateIndex {
    pub fn new(node: Node, strict: bool) -> Self {
        let root = node.repository().meta_dir(node.path()).join(INDEX_DIR);
        Self { node, root, strict }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// sorted, well-formed keys of one level
    fn keys(&self, dir: &Path, level: usize) -> Result<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e).with_path(dir),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.with_path(dir)?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.len() == WIDTHS[level] && name.bytes().all(|b| b.is_ascii_digit()) {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// nearest entry to `target` in the given direction, including an exact match
    fn nearest(
        &self,
        dir: &Path,
        level: usize,
        target: &[String; LEAF],
        seek: Seek,
    ) -> Result<Option<(Revision, PathBuf)>> {
        let keys = self.keys(dir, level)?;
        let key = &target[level];

        if keys.contains(key) {
            let sub = dir.join(key);
            let found = if level + 1 == LEAF {
                self.leaf(&sub)?
            } else {
                self.nearest(&sub, level + 1, target, seek)?
            };
            // an exact branch may turn out empty: fall back to siblings
            if found.is_some() {
                return Ok(found);
            }
        }

        let siblings: Vec<&String> = match seek {
            Seek::Older => keys.iter().filter(|k| *k < key).rev().collect(),
            Seek::Newer => keys.iter().filter(|k| *k > key).collect(),
        };
        for sibling in siblings {
            if let Some(found) = self.extreme(&dir.join(sibling), level + 1, seek)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// youngest (older seek) or oldest (newer seek) entry below `dir`
    fn extreme(&self, dir: &Path, level: usize, seek: Seek) -> Result<Option<(Revision, PathBuf)>> {
        if level == LEAF {
            return self.leaf(dir);
        }
        let mut keys = self.keys(dir, level)?;
        if seek == Seek::Older {
            keys.reverse();
        }
        for key in keys {
            if let Some(found) = self.extreme(&dir.join(key), level + 1, seek)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// revision named by the marker in `dir`, if it still exists
    fn leaf(&self, dir: &Path) -> Result<Option<(Revision, PathBuf)>> {
        let marker = dir.join(MARKER);
        let name = match fs::read_to_string(&marker) {
            Ok(name) => name.trim().to_string(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_path(marker),
        };
        match self.node.revision(&name) {
            Ok(revision) => Ok(Some((revision, dir.to_path_buf()))),
            Err(Error::RevisionNotFound { .. }) => {
                if self.strict {
                    return Err(Error::IndexOutOfSync {
                        entry: marker,
                        revision: name,
                    });
                }
                warn!(
                    path = self.node.path(),
                    entry = %marker.display(),
                    revision = %name,
                    "date index entry points to missing revision, skipping"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// date encoded by a leaf directory's path
    fn leaf_date(&self, dir: &Path) -> Option<DateTime<Utc>> {
        let relative = dir.strip_prefix(&self.root).ok()?;
        let fields: Vec<u32> = relative
            .components()
            .map(|c| c.as_os_str().to_str()?.parse().ok())
            .collect::<Option<_>>()?;
        let &[year, month, day, hour, minute, second, milli] = fields.as_slice() else {
            return None;
        };
        let naive = NaiveDate::from_ymd_opt(year as i32, month, day)?
            .and_hms_milli_opt(hour, minute, second, milli)?;
        Some(Utc.from_utc_datetime(&naive))
    }

    fn leaf_dir(&self, root: &Path, date: &DateTime<Utc>) -> PathBuf {
        fields(date).iter().fold(root.to_path_buf(), |dir, f| dir.join(f))
    }

    /// write the marker for `name` below `root`, unless an entry exists for that instant
    fn add_entry(&self, root: &Path, name: &str) -> Result<()> {
        let date = self.node.revision(name)?.creation_date()?;
        let dir = self.leaf_dir(root, &date);
        let marker = dir.join(MARKER);
        if marker.exists() {
            debug!(path = self.node.path(), revision = name, "date index entry already present");
            return Ok(());
        }
        fs::create_dir_all(&dir).with_path(&dir)?;
        write_atomic(&marker, format!("{}\n", name).as_bytes())
    }

    /// strictly older (or younger) lookup with a guard against entries whose
    /// revision date disagrees with their position in the index
    fn strictly(&self, date: DateTime<Utc>, seek: Seek) -> Result<Option<Revision>> {
        let step = chrono::Duration::milliseconds(1);
        let mut query = match seek {
            Seek::Older => date - step,
            Seek::Newer => date + step,
        };
        loop {
            let Some((revision, leaf)) = self.nearest(&self.root, 0, &fields(&query), seek)? else {
                return Ok(None);
            };
            let created = revision.creation_date()?;
            let ok = match seek {
                Seek::Older => created < date,
                Seek::Newer => created > date,
            };
            if ok {
                return Ok(Some(revision));
            }
            warn!(
                path = self.node.path(),
                revision = revision.name(),
                "date index entry disagrees with revision creation date"
            );
            let Some(key) = self.leaf_date(&leaf) else {
                return Ok(None);
            };
            query = match seek {
                Seek::Older => key - step,
                Seek::Newer => key + step,
            };
        }
    }
}

impl DateIndex for DirectoryDateIndex {
    fn exists(&self) -> bool {
        self.root.is_dir()
    }

    fn build(&self) -> Result<()> {
        if self.exists() {
            return Ok(());
        }
        let names = self.node.revision_names()?;

        // build next to the final location, then swap in
        let parent = self.root.parent().unwrap_or(&self.root);
        let staging = parent.join(format!(
            ".{}.{}",
            INDEX_DIR,
            uuid::Uuid::new_v4().simple()
        ));
        fs::create_dir_all(&staging).with_path(&staging)?;
        for name in &names {
            if let Err(e) = self.add_entry(&staging, name) {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        }
        if let Err(e) = fs::rename(&staging, &self.root) {
            let _ = fs::remove_dir_all(&staging);
            // someone else built it meanwhile
            if self.exists() {
                return Ok(());
            }
            return Err(e).with_path(&self.root);
        }
        debug!(path = self.node.path(), revisions = names.len(), "built date index");
        Ok(())
    }

    fn add_revision(&self, name: &str) -> Result<()> {
        self.add_entry(&self.root, name)
    }

    fn delete_revision(&self, name: &str) -> Result<()> {
        let date = self.node.revision(name)?.creation_date()?;
        let dir = self.leaf_dir(&self.root, &date);
        let marker = dir.join(MARKER);

        let indexed = match fs::read_to_string(&marker) {
            Ok(content) => content.trim().to_string(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).with_path(marker),
        };
        if indexed != name {
            warn!(
                path = self.node.path(),
                expected = name,
                found = %indexed,
                "date index entry names another revision, leaving it"
            );
            return Ok(());
        }

        fs::remove_file(&marker).with_path(&marker)?;
        prune_empty_dirs(&dir, &self.root);
        Ok(())
    }

    fn revision_at(&self, date: DateTime<Utc>) -> Result<Option<Revision>> {
        Ok(self
            .nearest(&self.root, 0, &fields(&date), Seek::Older)?
            .map(|(revision, _)| revision))
    }

    fn revision_older_than(&self, date: DateTime<Utc>) -> Result<Option<Revision>> {
        self.strictly(date, Seek::Older)
    }

    fn revision_younger_than(&self, date: DateTime<Utc>) -> Result<Option<Revision>> {
        self.strictly(date, Seek::Newer)
    }

    fn most_recent_revision(&self) -> Result<Option<Revision>> {
        Ok(self
            .extreme(&self.root, 0, Seek::Older)?
            .map(|(revision, _)| revision))
    }

    fn oldest_revision(&self) -> Result<Option<Revision>> {
        Ok(self
            .extreme(&self.root, 0, Seek::Newer)?
            .map(|(revision, _)| revision))
    }
}

/// zero-padded UTC date fields, one per index level
fn fields(date: &DateTime<Utc>) -> [String; LEAF] {
    [
        format!("{:04}", date.year()),
        format!("{:02}", date.month()),
        format!("{:02}", date.day()),
        format!("{:02}", date.hour()),
        format!("{:02}", date.minute()),
        format!("{:02}", date.second()),
        format!("{:03}", date.timestamp_subsec_millis()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::repo::Repository;
    use crate::types::NodeKind;
    use chrono::Duration;
    use tempfile::tempdir;

    fn resource() -> (tempfile::TempDir, Node) {
        let dir = tempdir().unwrap();
        let repo = Repository::new(Config::new(dir.path())).unwrap();
        let node = repo
            .root_node()
            .unwrap()
            .add_node("doc.txt", NodeKind::Resource)
            .unwrap();
        (dir, node)
    }

    fn revise(node: &Node, at: DateTime<Utc>, text: &str) -> Revision {
        node.checkout("alice").unwrap();
        node.write_content(text.as_bytes()).unwrap();
        node.checkin_at(text, at).unwrap()
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap() + Duration::milliseconds(900)
    }

    #[test]
    fn test_fields_are_padded() {
        let date = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap() + Duration::milliseconds(7);
        assert_eq!(
            fields(&date),
            ["2024", "02", "03", "04", "05", "06", "007"].map(String::from)
        );
    }

    #[test]
    fn test_lookups() {
        let (_dir, node) = resource();
        let t1 = base();
        let t2 = t1 + Duration::milliseconds(150); // crosses into a new year
        let t3 = t2 + Duration::days(40);
        let r1 = revise(&node, t1, "one");
        let r2 = revise(&node, t2, "two");
        let r3 = revise(&node, t3, "three");

        let index = DirectoryDateIndex::new(node.clone(), false);
        assert!(index.exists());

        assert_eq!(index.revision_at(t2).unwrap(), Some(r2.clone()));
        assert_eq!(
            index.revision_at(t2 - Duration::milliseconds(1)).unwrap(),
            Some(r1.clone())
        );
        assert_eq!(index.revision_at(t3 + Duration::days(400)).unwrap(), Some(r3.clone()));
        assert_eq!(index.revision_at(t1 - Duration::milliseconds(1)).unwrap(), None);

        assert_eq!(index.revision_older_than(t2).unwrap(), Some(r1.clone()));
        assert_eq!(index.revision_older_than(t1).unwrap(), None);
        assert_eq!(index.revision_younger_than(t2).unwrap(), Some(r3.clone()));
        assert_eq!(index.revision_younger_than(t3).unwrap(), None);
        // sparse month between t2 and t3
        assert_eq!(
            index.revision_younger_than(t2 + Duration::days(20)).unwrap(),
            Some(r3.clone())
        );

        assert_eq!(index.most_recent_revision().unwrap(), Some(r3));
        assert_eq!(index.oldest_revision().unwrap(), Some(r1));
    }

    #[test]
    fn test_rebuild_matches() {
        let (_dir, node) = resource();
        let t1 = base();
        let t2 = t1 + Duration::hours(5);
        let t3 = t2 + Duration::seconds(1);
        for (t, text) in [(t1, "a"), (t2, "b"), (t3, "c")] {
            revise(&node, t, text);
        }

        let index = DirectoryDateIndex::new(node.clone(), false);
        let queries = |index: &DirectoryDateIndex| {
            vec![
                index.revision_at(t2).unwrap(),
                index.revision_at(t2 - Duration::milliseconds(1)).unwrap(),
                index.revision_older_than(t2).unwrap(),
                index.revision_younger_than(t2).unwrap(),
                index.most_recent_revision().unwrap(),
                index.oldest_revision().unwrap(),
            ]
        };
        let before = queries(&index);

        fs::remove_dir_all(index.root()).unwrap();
        assert!(!index.exists());
        index.build().unwrap();
        assert!(index.exists());

        assert_eq!(queries(&index), before);
        // idempotent
        index.build().unwrap();
        assert_eq!(queries(&index), before);
    }

    #[test]
    fn test_missing_revision_is_skipped() {
        let (_dir, node) = resource();
        let t1 = base();
        let t2 = t1 + Duration::minutes(3);
        let r1 = revise(&node, t1, "a");
        let r2 = revise(&node, t2, "b");

        // revision files vanish behind the index's back
        fs::remove_dir_all(r2.dir()).unwrap();

        let index = DirectoryDateIndex::new(node.clone(), false);
        assert_eq!(index.revision_at(t2).unwrap(), Some(r1.clone()));
        assert_eq!(index.most_recent_revision().unwrap(), Some(r1));

        let strict = DirectoryDateIndex::new(node, true);
        assert!(matches!(
            strict.revision_at(t2),
            Err(Error::IndexOutOfSync { .. })
        ));
    }

    #[test]
    fn test_delete_prunes_empty_dirs() {
        let (_dir, node) = resource();
        let t1 = base();
        let t2 = t1 + Duration::days(2);
        revise(&node, t1, "a");
        let r2 = revise(&node, t2, "b");

        let index = DirectoryDateIndex::new(node.clone(), false);
        let leaf = index.leaf_dir(index.root(), &t2);
        assert!(leaf.join(MARKER).is_file());

        index.delete_revision(r2.name()).unwrap();
        assert!(!leaf.exists());
        assert!(index.root().join("2023").is_dir());
        assert!(!index.root().join("2024").exists());
    }

    #[test]
    fn test_delete_with_mismatched_marker_keeps_entry() {
        let (_dir, node) = resource();
        let r1 = revise(&node, base(), "a");

        let index = DirectoryDateIndex::new(node.clone(), false);
        let marker = index.leaf_dir(index.root(), &base()).join(MARKER);
        fs::write(&marker, "12345\n").unwrap();

        index.delete_revision(r1.name()).unwrap();
        assert!(marker.is_file());
    }

    #[test]
    fn test_leaf_date() {
        let (_dir, node) = resource();
        let index = DirectoryDateIndex::new(node, false);
        let date = base();
        assert_eq!(index.leaf_date(&index.leaf_dir(index.root(), &date)), Some(date));
    }
}
