//! checkout/checkin and revision history of resources
//!
//! a resource is either checked in or checked out by one user. checkin ends the
//! edit and snapshots content and properties into a revision named by its
//! creation time in milliseconds. all transitions run under the node lock and
//! re-read the persisted state first.

use std::fs::{self, File};
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::DateIndexKind;
use crate::error::{Error, IoResultExt, Result};
use crate::fs::{copy_file, prune_empty_dirs, AtomicFile};
use crate::index::{DateIndex, Direction, DirectoryDateIndex, IterStart, RevisionIter, ScanDateIndex};
use crate::indexer::{notify, Change};
use crate::meta::write_properties;
use crate::node::{touch, Node};
use crate::revision::{date_to_name, name_to_date, sort_names, Revision};
use crate::types::{names, Property, PropertyMap};

/// properties describing the live checkout state, never part of a snapshot
const LIVE_ONLY: [&str; 5] = [
    names::IS_CHECKED_OUT,
    names::CHECKOUT_USER,
    names::CHECKOUT_DATE,
    names::CHECKIN_DATE,
    names::TOTAL_REVISIONS,
];

/// properties owned by a revision, never copied back onto the live node
const REVISION_ONLY: [&str; 4] = [
    names::REVISION_CREATION_DATE,
    names::REVISION_CREATOR,
    names::REVISION_COMMENT,
    names::REVISION_TAG,
];

impl Node {
    // -- checkout state --

    pub fn is_checked_out(&self) -> Result<bool> {
        Ok(checked_out_by(&self.read_meta()?).is_some())
    }

    pub fn checkout_user_id(&self) -> Result<Option<String>> {
        Ok(checked_out_by(&self.read_meta()?))
    }

    pub fn checkout_date(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .property(names::CHECKOUT_DATE)?
            .and_then(|p| p.as_date()))
    }

    pub fn checkin_date(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.property(names::CHECKIN_DATE)?.and_then(|p| p.as_date()))
    }

    /// mark the resource as being edited by `user`
    pub fn checkout(&self, user: &str) -> Result<()> {
        self.require_resource()?;
        let _lock = self.lock();
        let mut props = self.read_meta_locked()?;
        if let Some(holder) = checked_out_by(&props) {
            return Err(Error::AlreadyCheckedOut {
                path: self.path().to_string(),
                user: holder,
            });
        }

        insert(&mut props, Property::new(names::IS_CHECKED_OUT, true));
        insert(&mut props, Property::new(names::CHECKOUT_USER, user));
        insert(&mut props, Property::new(names::CHECKOUT_DATE, Utc::now()));
        self.write_meta(&props)?;

        info!(path = self.path(), user, "checked out");
        Ok(())
    }

    /// end the edit and record a revision stamped with the current time
    ///
    /// the stamp is at least one millisecond after the most recent revision, so
    /// sequential checkins yield strictly increasing revision names.
    pub fn checkin(&self, comment: &str) -> Result<Revision> {
        self.checkin_with(comment, None)
    }

    /// end the edit and record a revision stamped with `at`
    ///
    /// used to backfill history; if a revision already carries that
    /// millisecond the stamp moves forward until it is free.
    pub fn checkin_at(&self, comment: &str, at: DateTime<Utc>) -> Result<Revision> {
        self.checkin_with(comment, Some(at))
    }

    fn checkin_with(&self, comment: &str, at: Option<DateTime<Utc>>) -> Result<Revision> {
        self.require_resource()?;
        let _lock = self.lock();
        // revisions must land next to the live meta file
        self.repository().meta_dir_for_write(self.path())?;
        let mut props = self.read_meta_locked()?;
        let Some(user) = checked_out_by(&props) else {
            return Err(Error::NotCheckedOut(self.path().to_string()));
        };

        let stamp = match at {
            Some(at) => truncate_millis(at),
            None => {
                let now = truncate_millis(Utc::now());
                match self.latest_revision_date()? {
                    Some(latest) if latest >= now => latest + Duration::milliseconds(1),
                    _ => now,
                }
            }
        };

        let revision = self.create_revision(&props, stamp, &user, comment)?;
        let created = revision.creation_date()?;

        touch(&mut props, created);
        insert(&mut props, Property::new(names::CHECKIN_DATE, created));
        clear_checkout(&mut props);
        if let Some(total) = props.get(names::TOTAL_REVISIONS).and_then(|p| p.as_long()) {
            insert(&mut props, Property::new(names::TOTAL_REVISIONS, total + 1));
        }
        self.write_meta(&props)?;

        info!(
            path = self.path(),
            user = %user,
            revision = revision.name(),
            "checked in"
        );
        Ok(revision)
    }

    /// end the edit without recording a revision
    pub fn cancel_checkout(&self) -> Result<()> {
        self.require_resource()?;
        let _lock = self.lock();
        let mut props = self.read_meta_locked()?;
        if checked_out_by(&props).is_none() {
            return Err(Error::NotCheckedOut(self.path().to_string()));
        }
        clear_checkout(&mut props);
        self.write_meta(&props)?;
        info!(path = self.path(), "checkout cancelled");
        Ok(())
    }

    /// snapshot the live content and `props` into a new revision
    ///
    /// caller holds the node lock.
    fn create_revision(
        &self,
        props: &PropertyMap,
        stamp: DateTime<Utc>,
        user: &str,
        comment: &str,
    ) -> Result<Revision> {
        let mut stamp = stamp;
        let (name, dir) = loop {
            let name = date_to_name(&stamp);
            let dir = self.revision_dir(&name);
            if !dir.exists() {
                break (name, dir);
            }
            debug!(path = self.path(), revision = %name, "revision name taken, bumping stamp");
            stamp += Duration::milliseconds(1);
        };

        // content first: the meta file marks the revision as complete
        let content = self.repository().content_file(self.path());
        let target = dir.join("content");
        match fs::metadata(&content) {
            Ok(_) => copy_file(&content, &target)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&dir).with_path(&dir)?;
                File::create(&target).with_path(&target)?;
            }
            Err(e) => return Err(e).with_path(content),
        }

        let mut snapshot = props.clone();
        for name in LIVE_ONLY {
            snapshot.remove(name);
        }
        insert(
            &mut snapshot,
            Property::new(names::REVISION_CREATION_DATE, stamp),
        );
        insert(&mut snapshot, Property::new(names::REVISION_CREATOR, user));
        insert(&mut snapshot, Property::new(names::REVISION_COMMENT, comment));
        write_properties(&dir.join("meta"), &snapshot)?;

        let revision = Revision::open(self, &name)?;

        let index = self.index_handle();
        let registered = if index.exists() {
            index.add_revision(&name)
        } else {
            index.build()
        };
        if let Err(e) = registered {
            warn!(path = self.path(), revision = %name, error = %e, "date index update failed");
        }

        debug!(path = self.path(), revision = %name, "created revision");
        Ok(revision)
    }

    /// replace the live content and properties with those of a revision
    ///
    /// the checkout state and revision counter of the live node are kept.
    pub fn restore(&self, name: &str) -> Result<()> {
        self.require_resource()?;
        let revision = self.revision(name)?;
        let _lock = self.lock();
        let live = self.read_meta_locked()?;

        let source = revision.content_path();
        let mut reader = File::open(&source).with_path(&source)?;
        let target = self.repository().content_target(self.path());
        let mut file = AtomicFile::create(&target, self.repository().config().copy_on_write)?;
        let size = io::copy(&mut reader, &mut file).with_path(&target)?;
        file.commit()?;

        let mut props = revision.properties()?;
        for name in REVISION_ONLY {
            props.remove(name);
        }
        for name in LIVE_ONLY {
            match live.get(name) {
                Some(property) => insert(&mut props, property.clone()),
                None => {
                    props.remove(name);
                }
            }
        }
        insert(&mut props, Property::new(names::SIZE, size as i64));
        touch(&mut props, Utc::now());
        self.write_meta(&props)?;

        info!(path = self.path(), revision = name, "restored revision");
        notify(self, Change::Content);
        Ok(())
    }

    // -- revisions --

    pub(crate) fn revisions_dir(&self) -> PathBuf {
        self.repository().meta_dir(self.path()).join("revisions")
    }

    pub(crate) fn revision_dir(&self, name: &str) -> PathBuf {
        let relative = match &self.repository().config().revision_split {
            Some(split) => split.split(name),
            None => name.to_string(),
        };
        self.revisions_dir().join(relative)
    }

    /// names of all complete revisions, oldest first
    pub(crate) fn revision_names(&self) -> Result<Vec<String>> {
        let base = self.revisions_dir();
        let split = self.repository().config().revision_split.clone();
        let mut found = Vec::new();

        for entry in WalkDir::new(&base).min_depth(2) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.io_error().is_some_and(|e| e.kind() == io::ErrorKind::NotFound) => {
                    break
                }
                Err(e) => {
                    let path = e.path().unwrap_or(&base).to_path_buf();
                    return Err(Error::Io {
                        path,
                        source: e.into(),
                    });
                }
            };
            if !entry.file_type().is_file() || entry.file_name() != "meta" {
                continue;
            }
            let Some(relative) = entry
                .path()
                .parent()
                .and_then(|dir| dir.strip_prefix(&base).ok())
            else {
                continue;
            };
            let relative: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            let relative = relative.join("/");
            let name = match &split {
                Some(split) => split.unsplit(&relative),
                None => relative,
            };
            if name.parse::<i64>().is_ok() {
                found.push(name);
            } else {
                debug!(path = self.path(), entry = %entry.path().display(), "ignoring stray revision entry");
            }
        }

        sort_names(&mut found);
        Ok(found)
    }

    /// every revision, oldest first
    ///
    /// reads the whole revision tree; use [`Node::revision_iter`] to walk long
    /// histories.
    pub fn revisions(&self) -> Result<Vec<Revision>> {
        self.revision_names()?
            .iter()
            .map(|name| Revision::open(self, name))
            .collect()
    }

    pub fn revision(&self, name: &str) -> Result<Revision> {
        Revision::open(self, name)
    }

    /// oldest revision carrying the tag
    pub fn revision_by_tag(&self, tag: &str) -> Result<Revision> {
        for revision in self.revision_iter(IterStart::Oldest, Direction::Forward)? {
            let revision = revision?;
            if revision.tag()?.as_deref() == Some(tag) {
                return Ok(revision);
            }
        }
        Err(Error::TagNotFound {
            path: self.path().to_string(),
            tag: tag.to_string(),
        })
    }

    /// number of revisions, from the stored counter when present
    pub fn total_revisions(&self) -> Result<u64> {
        if let Some(total) = self
            .property(names::TOTAL_REVISIONS)?
            .and_then(|p| p.as_long())
        {
            return Ok(total.max(0) as u64);
        }
        let _lock = self.lock();
        let mut props = self.read_meta_locked()?;
        // another caller may have rebuilt it while we waited
        if let Some(total) = props.get(names::TOTAL_REVISIONS).and_then(|p| p.as_long()) {
            return Ok(total.max(0) as u64);
        }
        let total = self.revision_names()?.len() as i64;
        insert(&mut props, Property::new(names::TOTAL_REVISIONS, total));
        self.write_meta(&props)?;
        debug!(path = self.path(), total, "rebuilt revision counter");
        Ok(total as u64)
    }

    /// remove a revision and its date index entry
    pub fn delete_revision(&self, name: &str) -> Result<()> {
        let revision = self.revision(name)?;
        let _lock = self.lock();

        let index = self.index_handle();
        if index.exists() {
            if let Err(e) = index.delete_revision(name) {
                warn!(path = self.path(), revision = name, error = %e, "date index update failed");
            }
        }

        fs::remove_dir_all(revision.dir()).with_path(revision.dir())?;
        if let Some(parent) = revision.dir().parent() {
            prune_empty_dirs(parent, &self.revisions_dir());
        }

        let mut props = self.read_meta_locked()?;
        if let Some(total) = props.get(names::TOTAL_REVISIONS).and_then(|p| p.as_long()) {
            insert(
                &mut props,
                Property::new(names::TOTAL_REVISIONS, (total - 1).max(0)),
            );
            self.write_meta(&props)?;
        }

        info!(path = self.path(), revision = name, "deleted revision");
        Ok(())
    }

    /// the revision current at `date`
    pub fn revision_at(&self, date: DateTime<Utc>) -> Result<Option<Revision>> {
        self.date_index()?.revision_at(date)
    }

    pub fn most_recent_revision(&self) -> Result<Option<Revision>> {
        self.date_index()?.most_recent_revision()
    }

    pub fn oldest_revision(&self) -> Result<Option<Revision>> {
        self.date_index()?.oldest_revision()
    }

    /// lazy walk over the revisions
    pub fn revision_iter(&self, start: IterStart, direction: Direction) -> Result<RevisionIter> {
        Ok(RevisionIter::new(self.date_index()?, start, direction))
    }

    /// the node's date index, built first if absent
    pub fn date_index(&self) -> Result<Box<dyn DateIndex>> {
        let index = self.index_handle();
        if !index.exists() {
            index.build()?;
        }
        Ok(index)
    }

    fn index_handle(&self) -> Box<dyn DateIndex> {
        let config = self.repository().config();
        match config.date_index {
            DateIndexKind::Directory => {
                Box::new(DirectoryDateIndex::new(self.clone(), config.strict_index))
            }
            DateIndexKind::Scan => Box::new(ScanDateIndex::new(self.clone())),
        }
    }

    /// creation date of the youngest revision, without building an index
    fn latest_revision_date(&self) -> Result<Option<DateTime<Utc>>> {
        let index = self.index_handle();
        if index.exists() {
            return match index.most_recent_revision()? {
                Some(revision) => revision.creation_date().map(Some),
                None => Ok(None),
            };
        }
        Ok(self
            .revision_names()?
            .last()
            .and_then(|name| name_to_date(name)))
    }
}

/// the user holding the checkout, if any
fn checked_out_by(props: &PropertyMap) -> Option<String> {
    let checked_out = props
        .get(names::IS_CHECKED_OUT)
        .and_then(|p| p.as_bool())
        .unwrap_or(false);
    if !checked_out {
        return None;
    }
    Some(
        props
            .get(names::CHECKOUT_USER)
            .and_then(|p| p.as_str())
            .unwrap_or_default()
            .to_string(),
    )
}

fn clear_checkout(props: &mut PropertyMap) {
    insert(props, Property::new(names::IS_CHECKED_OUT, false));
    props.remove(names::CHECKOUT_USER);
    props.remove(names::CHECKOUT_DATE);
}

fn insert(props: &mut PropertyMap, property: Property) {
    props.insert(property.name.clone(), property);
}

fn truncate_millis(date: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(date.timestamp_millis()).unwrap_or(date)
}
