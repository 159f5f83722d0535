use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{is_io_not_found, Error, IoResultExt, Result};
use crate::meta::{read_properties, write_properties};
use crate::node::Node;
use crate::types::{names, Property, PropertyMap};

/// an immutable snapshot of a resource's content and properties
///
/// a revision refers to its node; it cannot be checked out, checked in,
/// restored or given children.
#[derive(Clone, Debug)]
pub struct Revision {
    node: Node,
    name: String,
    dir: PathBuf,
}

impl PartialEq for Revision {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node && self.name == other.name
    }
}

impl Eq for Revision {}

impl Revision {
    /// open an existing revision of the node
    pub(crate) fn open(node: &Node, name: &str) -> Result<Self> {
        let dir = node.revision_dir(name);
        if !dir.join("meta").is_file() {
            return Err(Error::RevisionNotFound {
                path: node.path().to_string(),
                revision: name.to_string(),
            });
        }
        Ok(Self {
            node: node.clone(),
            name: name.to_string(),
            dir,
        })
    }

    /// revision name: creation time in milliseconds since the epoch
    pub fn name(&self) -> &str {
        &self.name
    }

    /// path of the node this revision belongs to
    pub fn node_path(&self) -> &str {
        self.node.path()
    }

    pub fn node_id(&self) -> &str {
        self.node.id()
    }

    /// the node this revision belongs to
    pub fn node(&self) -> &Node {
        &self.node
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn content_path(&self) -> PathBuf {
        self.dir.join("content")
    }

    pub(crate) fn meta_path(&self) -> PathBuf {
        self.dir.join("meta")
    }

    pub fn properties(&self) -> Result<PropertyMap> {
        read_properties(&self.meta_path())
    }

    pub fn property(&self, name: &str) -> Result<Option<Property>> {
        Ok(self.properties()?.remove(name))
    }

    pub fn creation_date(&self) -> Result<DateTime<Utc>> {
        match self.property(names::REVISION_CREATION_DATE)? {
            Some(property) => property.expect_date(),
            None => name_to_date(&self.name).ok_or_else(|| Error::CorruptMeta {
                path: self.meta_path(),
                line: 0,
                message: format!("no creation date for revision {}", self.name),
            }),
        }
    }

    pub fn creator(&self) -> Result<Option<String>> {
        self.string_property(names::REVISION_CREATOR)
    }

    pub fn comment(&self) -> Result<Option<String>> {
        self.string_property(names::REVISION_COMMENT)
    }

    pub fn tag(&self) -> Result<Option<String>> {
        self.string_property(names::REVISION_TAG)
    }

    /// label this revision; tags need not be unique
    pub fn set_tag(&self, tag: &str) -> Result<()> {
        let _lock = self.node.lock();
        let mut props = self.properties()?;
        props.insert(
            names::REVISION_TAG.to_string(),
            Property::new(names::REVISION_TAG, tag),
        );
        write_properties(&self.meta_path(), &props)
    }

    pub fn content(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.open_read()?
            .read_to_end(&mut buf)
            .with_path(self.content_path())?;
        Ok(buf)
    }

    pub fn open_read(&self) -> Result<Box<dyn Read + Send>> {
        let path = self.content_path();
        let file = File::open(&path).with_path(&path)?;
        Ok(Box::new(file))
    }

    pub fn size(&self) -> Result<u64> {
        let path = self.content_path();
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e).with_path(path),
        }
    }

    fn string_property(&self, name: &str) -> Result<Option<String>> {
        match self.property(name) {
            Ok(p) => Ok(p.and_then(|p| p.as_str().map(str::to_string))),
            Err(e) if is_io_not_found(&e) => Err(Error::RevisionNotFound {
                path: self.node.path().to_string(),
                revision: self.name.clone(),
            }),
            Err(e) => Err(e),
        }
    }
}

/// revision name for a point in time
pub(crate) fn date_to_name(date: &DateTime<Utc>) -> String {
    date.timestamp_millis().to_string()
}

/// point in time encoded in a revision name
pub(crate) fn name_to_date(name: &str) -> Option<DateTime<Utc>> {
    name.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

/// numeric ordering of revision names
pub(crate) fn sort_names(names: &mut [String]) {
    names.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_name_date_conversion() {
        let date = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::milliseconds(678);
        let name = date_to_name(&date);
        assert_eq!(name, "1704164645678");
        assert_eq!(name_to_date(&name), Some(date));
        assert_eq!(name_to_date("tag"), None);
    }

    #[test]
    fn test_sort_names_numeric() {
        let mut names = vec!["10".to_string(), "9".to_string(), "100".to_string()];
        sort_names(&mut names);
        assert_eq!(names, vec!["9", "10", "100"]);
    }
}
