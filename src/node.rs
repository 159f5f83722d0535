use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{is_io_not_found, Error, IoResultExt, Result};
use crate::fs::{prune_empty_dirs, AtomicFile};
use crate::indexer::{notify, Change};
use crate::listing;
use crate::meta::{read_properties, write_properties};
use crate::repo::{NodeLock, Repository};
use crate::types::{names, NodeKind, Property, PropertyMap, PropertyValue};

/// an addressable node in the repository
///
/// a node is a handle: it holds only the repository and the logical path, and
/// re-reads persisted state on every call.
#[derive(Clone, Debug)]
pub struct Node {
    repo: Repository,
    path: String,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Node {}

impl Node {
    pub(crate) fn new(repo: Repository, path: String) -> Self {
        Self { repo, path }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// logical path, `/` for the root
    pub fn path(&self) -> &str {
        &self.path
    }

    /// stable identifier
    pub fn id(&self) -> &str {
        &self.path
    }

    /// last path segment, empty for the root
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    pub fn parent(&self) -> Result<Option<Node>> {
        if self.path == "/" {
            return Ok(None);
        }
        let parent = match self.path.rfind('/') {
            Some(0) | None => "/",
            Some(i) => &self.path[..i],
        };
        self.repo.get_node(parent).map(Some)
    }

    pub fn kind(&self) -> Result<NodeKind> {
        let props = self.read_meta()?;
        match props.get(names::TYPE).and_then(|p| p.as_str()) {
            Some(kind) => kind.parse().map_err(|message| Error::CorruptMeta {
                path: self.repo.meta_file(&self.path),
                line: 0,
                message,
            }),
            None => self.infer_kind(),
        }
    }

    pub fn is_resource(&self) -> Result<bool> {
        Ok(self.kind()? == NodeKind::Resource)
    }

    pub fn is_collection(&self) -> Result<bool> {
        Ok(self.kind()? == NodeKind::Collection)
    }

    pub(crate) fn require_resource(&self) -> Result<()> {
        if self.is_resource()? {
            Ok(())
        } else {
            Err(Error::NotAResource(self.path.clone()))
        }
    }

    fn require_collection(&self) -> Result<()> {
        if self.is_collection()? {
            Ok(())
        } else {
            Err(Error::NotACollection(self.path.clone()))
        }
    }

    // -- properties --

    /// all properties of the node
    pub fn properties(&self) -> Result<PropertyMap> {
        self.read_meta()
    }

    pub fn property(&self, name: &str) -> Result<Option<Property>> {
        Ok(self.read_meta()?.remove(name))
    }

    pub fn has_property(&self, name: &str) -> Result<bool> {
        Ok(self.read_meta()?.contains_key(name))
    }

    /// set a property; the meta file is rewritten immediately
    pub fn set_property(&self, name: &str, value: impl Into<PropertyValue>) -> Result<Property> {
        let property = Property::new(name, value);
        self.update_meta(|props| {
            props.insert(property.name.clone(), property.clone());
            Ok(())
        })?;
        notify(self, Change::Property(&property));
        Ok(property)
    }

    pub fn remove_property(&self, name: &str) -> Result<()> {
        let removed = self.update_meta(|props| Ok(props.remove(name).is_some()))?;
        if !removed {
            return Err(Error::PropertyNotFound {
                path: self.path.clone(),
                name: name.to_string(),
            });
        }
        notify(self, Change::PropertyRemoved(name));
        Ok(())
    }

    /// content length in bytes; zero for collections
    pub fn size(&self) -> Result<u64> {
        if self.is_collection()? {
            return Ok(0);
        }
        let file = self.repo.content_file(&self.path);
        match fs::metadata(&file) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(self
                .property(names::SIZE)?
                .and_then(|p| p.as_long())
                .unwrap_or(0) as u64),
            Err(e) => Err(e).with_path(file),
        }
    }

    pub fn last_modified(&self) -> Result<Option<DateTime<Utc>>> {
        if let Some(date) = self.property(names::LAST_MODIFIED)?.and_then(|p| p.as_date()) {
            return Ok(Some(date));
        }
        let file = self.repo.content_file(&self.path);
        match fs::metadata(&file).and_then(|m| m.modified()) {
            Ok(modified) => Ok(Some(modified.into())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_path(file),
        }
    }

    pub fn mime_type(&self) -> Result<Option<String>> {
        self.string_property(names::MIME_TYPE)
    }

    pub fn set_mime_type(&self, mime_type: &str) -> Result<()> {
        self.set_property(names::MIME_TYPE, mime_type).map(|_| ())
    }

    pub fn encoding(&self) -> Result<Option<String>> {
        self.string_property(names::ENCODING)
    }

    pub fn set_encoding(&self, encoding: &str) -> Result<()> {
        self.set_property(names::ENCODING, encoding).map(|_| ())
    }

    pub(crate) fn string_property(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .property(name)?
            .and_then(|p| p.as_str().map(str::to_string)))
    }

    // -- content --

    /// whole content; for collections the generated listing
    pub fn content(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.open_read()?
            .read_to_end(&mut buf)
            .with_path(self.repo.content_file(&self.path))?;
        Ok(buf)
    }

    pub fn open_read(&self) -> Result<Box<dyn Read + Send>> {
        if self.is_collection()? {
            return listing::collection_stream(self);
        }
        let file = self.repo.content_file(&self.path);
        let handle = File::open(&file).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::NodeNotFound(self.path.clone())
            } else {
                Error::Io {
                    path: file.clone(),
                    source: e,
                }
            }
        })?;
        Ok(Box::new(handle))
    }

    /// open a writer replacing the content; it is published on `close`
    pub fn open_write(&self) -> Result<NodeWriter> {
        self.require_resource()?;
        let target = self.repo.content_target(&self.path);
        let file = AtomicFile::create(&target, self.repo.config().copy_on_write)?;
        Ok(NodeWriter {
            node: self.clone(),
            file,
            closed: false,
        })
    }

    pub fn write_content(&self, content: &[u8]) -> Result<()> {
        let mut writer = self.open_write()?;
        if let Err(e) = writer.write_all(content) {
            writer.discard()?;
            return Err(e).with_path(self.repo.content_target(&self.path));
        }
        writer.close()
    }

    /// refresh size and last-modified after the content changed
    fn content_written(&self) -> Result<()> {
        let size = fs::metadata(self.repo.content_target(&self.path))
            .map(|m| m.len())
            .unwrap_or(0);
        self.update_meta(|props| {
            touch(props, Utc::now());
            props.insert(
                names::SIZE.to_string(),
                Property::new(names::SIZE, size as i64),
            );
            Ok(())
        })?;
        notify(self, Change::Content);
        Ok(())
    }

    // -- tree --

    fn child_path(&self, name: &str) -> String {
        if self.path == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", self.path, name)
        }
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.repo.exists(&self.child_path(name))
    }

    pub fn child(&self, name: &str) -> Result<Node> {
        self.repo.get_node(&self.child_path(name))
    }

    /// immediate children, ordered by path
    pub fn children(&self) -> Result<Vec<Node>> {
        self.require_collection()?;
        let prefix = self.child_path("");

        let paths = if self.children_split() {
            self.split_children(&prefix)?
        } else {
            self.flat_children()?
        };

        Ok(paths
            .into_iter()
            .map(|path| Node::new(self.repo.clone(), path))
            .collect())
    }

    fn children_split(&self) -> bool {
        self.repo
            .config()
            .split
            .as_ref()
            .is_some_and(|split| split.is_included(&self.child_path("")))
    }

    /// deepest physical directory, relative to the roots, holding every child
    fn children_base(&self) -> String {
        if self.children_split() {
            // the physical child prefix is a string prefix of every child's
            // physical path, so its directory part contains them all
            let physical = self.repo.physical(&self.child_path(""));
            let dir = physical.rfind('/').map(|i| &physical[..i]).unwrap_or("");
            dir.trim_start_matches('/').to_string()
        } else {
            self.repo
                .physical(&self.path)
                .trim_start_matches('/')
                .to_string()
        }
    }

    /// children stored directly in the content and meta directories
    fn flat_children(&self) -> Result<BTreeSet<String>> {
        let suffix = &self.repo.config().meta_suffix;
        let physical = self.repo.physical(&self.path);
        let rel = physical.trim_start_matches('/');

        let mut names = BTreeSet::new();
        for name in list_dir(&self.repo.content_root().join(rel))? {
            names.insert(name);
        }
        for name in list_dir(&self.repo.meta_root().join(rel))? {
            if let Some(stripped) = name.strip_suffix(suffix.as_str()) {
                if !stripped.is_empty() {
                    names.insert(stripped.to_string());
                }
            }
        }

        Ok(names
            .into_iter()
            .filter(|name| !self.repo.is_ignored(name))
            .map(|name| self.child_path(&name))
            .collect())
    }

    /// children spread over split directories: walk and map back
    fn split_children(&self, prefix: &str) -> Result<BTreeSet<String>> {
        let suffix = self.repo.config().meta_suffix.clone();
        let base = self.children_base();
        let mut paths = BTreeSet::new();

        let mut collect = |relative: &Path| {
            let components: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            let physical = if base.is_empty() {
                format!("/{}", components.join("/"))
            } else {
                format!("/{}/{}", base, components.join("/"))
            };
            let logical = self.repo.logical(&physical);
            if let Some(rest) = logical.strip_prefix(prefix) {
                if let Some(first) = rest.split('/').next().filter(|s| !s.is_empty()) {
                    paths.insert(self.child_path(first));
                }
            }
        };

        let meta_base = self.repo.meta_root().join(&base);
        let mut walker = WalkDir::new(&meta_base).min_depth(1).into_iter();
        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.io_error().is_some_and(|e| e.kind() == io::ErrorKind::NotFound) => {
                    break
                }
                Err(e) => return Err(walk_error(e, &meta_base)),
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            let Some(stripped) = name.strip_suffix(suffix.as_str()) else {
                continue;
            };
            // never descend into a node's own meta directory
            walker.skip_current_dir();
            if let Ok(relative) = entry.path().strip_prefix(&meta_base) {
                collect(&relative.with_file_name(stripped));
            }
        }

        let content_base = self.repo.content_root().join(&base);
        for entry in WalkDir::new(&content_base).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.io_error().is_some_and(|e| e.kind() == io::ErrorKind::NotFound) => {
                    break
                }
                Err(e) => return Err(walk_error(e, &content_base)),
            };
            if !entry.file_type().is_file()
                || self.repo.is_ignored(&entry.file_name().to_string_lossy())
            {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&content_base) {
                collect(relative);
            }
        }

        Ok(paths
            .into_iter()
            .filter(|path| !self.repo.is_ignored(path.rsplit('/').next().unwrap_or("")))
            .collect())
    }

    /// create a child node
    pub fn add_node(&self, name: &str, kind: NodeKind) -> Result<Node> {
        validate_name(name)?;
        self.require_collection()?;

        let path = self.child_path(name);
        if self.repo.node_exists(&path) {
            return Err(Error::NodeExists(path));
        }

        let target = self.repo.content_target(&path);
        match kind {
            NodeKind::Collection => fs::create_dir_all(&target).with_path(&target)?,
            NodeKind::Resource => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).with_path(parent)?;
                }
                File::create(&target).with_path(&target)?;
            }
        }

        let node = Node::new(self.repo.clone(), path);
        let mut props = PropertyMap::new();
        props.insert(
            names::TYPE.to_string(),
            Property::new(names::TYPE, kind.as_str()),
        );
        if kind == NodeKind::Resource {
            props.insert(names::SIZE.to_string(), Property::new(names::SIZE, 0i64));
        }
        touch(&mut props, Utc::now());
        {
            let _lock = node.lock();
            node.write_meta(&props)?;
        }
        debug!(path = node.path(), %kind, "created node");
        notify(&node, Change::Content);
        Ok(node)
    }

    /// delete this node, its properties and revisions, and all descendants
    pub fn delete(&self) -> Result<()> {
        if self.path == "/" {
            return Err(Error::InvalidPath("cannot delete the root node".into()));
        }
        let is_collection = self.is_collection()?;
        if is_collection {
            for child in self.children()? {
                child.delete()?;
            }
        }

        let _lock = self.lock();
        let physical = self.repo.physical(&self.path);
        if is_collection {
            // directory holding the children's meta directories
            remove_any(&self.repo.meta_root().join(physical.trim_start_matches('/')))?;
        }
        for content in [
            self.repo.content_target(&self.path),
            self.repo.content_file(&self.path),
        ] {
            remove_any(&content)?;
        }
        remove_any(&self.repo.meta_dir(&self.path))?;
        remove_any(&self.repo.meta_dir_for_write(&self.path)?)?;

        // drop split chunk directories left empty
        let parent = match self.path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(i) => self.path[..i].to_string(),
        };
        let parent_base = Node::new(self.repo.clone(), parent).children_base();
        let meta_parent = self
            .repo
            .meta_root()
            .join(physical.trim_start_matches('/'));
        let mut content_dirs: Vec<_> = self
            .repo
            .content_target(&self.path)
            .parent()
            .map(Path::to_path_buf)
            .into_iter()
            .collect();
        let mut meta_dirs: Vec<_> = meta_parent
            .parent()
            .map(Path::to_path_buf)
            .into_iter()
            .collect();
        if is_collection {
            let base = self.children_base();
            content_dirs.push(self.repo.content_root().join(&base));
            meta_dirs.push(self.repo.meta_root().join(&base));
        }
        for dir in &content_dirs {
            prune_empty_dirs(dir, &self.repo.content_root().join(&parent_base));
        }
        for dir in &meta_dirs {
            prune_empty_dirs(dir, &self.repo.meta_root().join(&parent_base));
        }

        debug!(path = %self.path, "deleted node");
        notify(self, Change::Removed);
        Ok(())
    }

    // -- meta file plumbing --

    pub(crate) fn lock(&self) -> NodeLock<'_> {
        self.repo.lock_node(&self.path)
    }

    /// read properties, materializing the meta file if the node has none yet
    pub(crate) fn read_meta(&self) -> Result<PropertyMap> {
        match read_properties(&self.repo.meta_file(&self.path)) {
            Err(e) if is_io_not_found(&e) => {
                let _lock = self.lock();
                self.read_meta_locked()
            }
            other => other,
        }
    }

    /// like `read_meta`, for callers already holding the node lock
    pub(crate) fn read_meta_locked(&self) -> Result<PropertyMap> {
        match read_properties(&self.repo.meta_file(&self.path)) {
            Err(e) if is_io_not_found(&e) => self.materialize_meta(),
            other => other,
        }
    }

    /// caller must hold the node lock
    pub(crate) fn write_meta(&self, props: &PropertyMap) -> Result<()> {
        let dir = self.repo.meta_dir_for_write(&self.path)?;
        write_properties(&dir.join("meta"), props)
    }

    /// read-modify-write the meta file under the node lock
    pub(crate) fn update_meta<T>(
        &self,
        f: impl FnOnce(&mut PropertyMap) -> Result<T>,
    ) -> Result<T> {
        let _lock = self.lock();
        let mut props = self.read_meta_locked()?;
        let out = f(&mut props)?;
        self.write_meta(&props)?;
        Ok(out)
    }

    fn infer_kind(&self) -> Result<NodeKind> {
        let file = self.repo.content_file(&self.path);
        match fs::metadata(&file) {
            Ok(meta) if meta.is_dir() => Ok(NodeKind::Collection),
            Ok(_) => Ok(NodeKind::Resource),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::NodeNotFound(self.path.clone()))
            }
            Err(e) => Err(e).with_path(file),
        }
    }

    /// build a meta file from what the content file tells us
    fn materialize_meta(&self) -> Result<PropertyMap> {
        let file = self.repo.content_file(&self.path);
        let meta = match fs::metadata(&file) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NodeNotFound(self.path.clone()))
            }
            Err(e) => return Err(e).with_path(file),
        };

        let kind = if meta.is_dir() {
            NodeKind::Collection
        } else {
            NodeKind::Resource
        };
        let modified: DateTime<Utc> = meta.modified().with_path(&file)?.into();

        let mut props = PropertyMap::new();
        props.insert(
            names::TYPE.to_string(),
            Property::new(names::TYPE, kind.as_str()),
        );
        if kind == NodeKind::Resource {
            props.insert(
                names::SIZE.to_string(),
                Property::new(names::SIZE, meta.len() as i64),
            );
        }
        touch(&mut props, modified);

        self.write_meta(&props)?;
        debug!(path = %self.path, %kind, "materialized meta file");
        Ok(props)
    }
}

/// set the last-modified property
pub(crate) fn touch(props: &mut PropertyMap, at: DateTime<Utc>) {
    props.insert(
        names::LAST_MODIFIED.to_string(),
        Property::new(names::LAST_MODIFIED, at),
    );
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
    {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// names in a directory; a missing directory is empty
fn list_dir(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e).with_path(dir),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.with_path(dir)?;
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    Ok(names)
}

/// remove a file or directory tree if present
fn remove_any(path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };
    result.with_path(path)
}

fn walk_error(err: walkdir::Error, base: &Path) -> Error {
    let path = err.path().unwrap_or(base).to_path_buf();
    Error::Io {
        path,
        source: err.into(),
    }
}

/// writer over a resource's content
///
/// bytes become visible on `close`; dropping an open writer closes it.
pub struct NodeWriter {
    node: Node,
    file: AtomicFile,
    closed: bool,
}

impl NodeWriter {
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// publish the content and update the node's properties
    ///
    /// calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.file.commit()?;
        self.node.content_written()
    }

    /// drop the written bytes without publishing them
    pub fn discard(mut self) -> Result<()> {
        self.closed = true;
        self.file.discard()
    }
}

impl Write for NodeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Drop for NodeWriter {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if std::thread::panicking() {
            // content written before an unwind is incomplete
            self.closed = true;
            warn!(path = self.node.path(), "writer dropped while panicking, discarding");
            if let Err(e) = self.file.discard() {
                warn!(path = self.node.path(), error = %e, "discarding dropped writer failed");
            }
        } else {
            warn!(path = self.node.path(), "writer dropped without close");
            if let Err(e) = self.close() {
                warn!(path = self.node.path(), error = %e, "closing dropped writer failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn test_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempdir().unwrap();
        let repo = Repository::new(Config::new(dir.path())).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_add_and_read_resource() {
        let (_dir, repo) = test_repo();
        let root = repo.root_node().unwrap();
        let a = root.add_node("a", NodeKind::Collection).unwrap();
        let b = a.add_node("b.txt", NodeKind::Resource).unwrap();

        assert_eq!(b.path(), "/a/b.txt");
        assert_eq!(b.name(), "b.txt");
        assert_eq!(b.kind().unwrap(), NodeKind::Resource);
        assert!(b.content().unwrap().is_empty());

        b.write_content(b"hello").unwrap();
        assert_eq!(b.content().unwrap(), b"hello");
        assert_eq!(b.size().unwrap(), 5);
        assert_eq!(b.property(names::SIZE).unwrap().unwrap().as_long(), Some(5));
        assert!(b.last_modified().unwrap().is_some());
        assert_eq!(b.parent().unwrap().unwrap(), a);
    }

    #[test]
    fn test_add_existing_fails() {
        let (_dir, repo) = test_repo();
        let root = repo.root_node().unwrap();
        root.add_node("a", NodeKind::Resource).unwrap();
        let err = root.add_node("a", NodeKind::Collection).unwrap_err();
        assert!(matches!(err, Error::NodeExists(_)));
        assert!(matches!(
            root.add_node("x/y", NodeKind::Resource),
            Err(Error::InvalidName(_))
        ));
    }

    #[test]
    fn test_resource_only_operations() {
        let (_dir, repo) = test_repo();
        let root = repo.root_node().unwrap();
        let dir = root.add_node("dir", NodeKind::Collection).unwrap();
        let file = root.add_node("file", NodeKind::Resource).unwrap();

        assert!(matches!(dir.open_write(), Err(Error::NotAResource(_))));
        assert!(matches!(
            file.add_node("child", NodeKind::Resource),
            Err(Error::NotACollection(_))
        ));
        assert!(matches!(file.children(), Err(Error::NotACollection(_))));
    }

    #[test]
    fn test_properties() {
        let (_dir, repo) = test_repo();
        let node = repo
            .root_node()
            .unwrap()
            .add_node("doc", NodeKind::Resource)
            .unwrap();

        node.set_property("title", "A: title\nwith lines").unwrap();
        node.set_property("pages", 12i64).unwrap();
        node.set_mime_type("text/plain").unwrap();

        let reopened = repo.get_node("/doc").unwrap();
        assert_eq!(
            reopened.property("title").unwrap().unwrap().as_str(),
            Some("A: title\nwith lines")
        );
        assert_eq!(reopened.property("pages").unwrap().unwrap().as_long(), Some(12));
        assert_eq!(reopened.mime_type().unwrap().as_deref(), Some("text/plain"));
        assert!(reopened.encoding().unwrap().is_none());

        reopened.remove_property("pages").unwrap();
        assert!(!node.has_property("pages").unwrap());
        assert!(matches!(
            node.remove_property("pages"),
            Err(Error::PropertyNotFound { .. })
        ));
    }

    #[test]
    fn test_children_ignore_hidden() {
        let (dir, repo) = test_repo();
        let root = repo.root_node().unwrap();
        root.add_node("b", NodeKind::Resource).unwrap();
        root.add_node("a", NodeKind::Collection).unwrap();
        fs::write(dir.path().join("content/.hidden"), "x").unwrap();
        // content without meta is still a child
        fs::write(dir.path().join("content/c"), "x").unwrap();

        let children: Vec<_> = root
            .children()
            .unwrap()
            .iter()
            .map(|n| n.path().to_string())
            .collect();
        assert_eq!(children, vec!["/a", "/b", "/c"]);
    }

    #[test]
    fn test_lazy_meta_materialization() {
        let (dir, repo) = test_repo();
        fs::create_dir_all(dir.path().join("content/docs")).unwrap();
        fs::write(dir.path().join("content/docs/readme.txt"), "hi").unwrap();

        let docs = repo.get_node("/docs").unwrap();
        assert!(docs.is_collection().unwrap());
        let readme = repo.get_node("/docs/readme.txt").unwrap();
        assert_eq!(readme.property(names::SIZE).unwrap().unwrap().as_long(), Some(2));
        assert!(dir.path().join("meta/docs/readme.txt.meta/meta").is_file());
    }

    #[test]
    fn test_abandoned_write_keeps_old_content() {
        let (_dir, repo) = test_repo();
        let node = repo
            .root_node()
            .unwrap()
            .add_node("f", NodeKind::Resource)
            .unwrap();
        node.write_content(b"old").unwrap();

        let mut writer = node.open_write().unwrap();
        writer.write_all(b"partial new").unwrap();
        assert_eq!(node.content().unwrap(), b"old");
        writer.discard().unwrap();
        assert_eq!(node.content().unwrap(), b"old");
    }

    #[test]
    fn test_dropped_writer_publishes() {
        let (_dir, repo) = test_repo();
        let node = repo
            .root_node()
            .unwrap()
            .add_node("f", NodeKind::Resource)
            .unwrap();
        {
            let mut writer = node.open_write().unwrap();
            writer.write_all(b"forgotten").unwrap();
        }
        assert_eq!(node.content().unwrap(), b"forgotten");
    }

    #[test]
    fn test_writer_unwinding_keeps_old_content() {
        let (_dir, repo) = test_repo();
        let node = repo
            .root_node()
            .unwrap()
            .add_node("f", NodeKind::Resource)
            .unwrap();
        node.write_content(b"old").unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut writer = node.open_write().unwrap();
            writer.write_all(b"PARTIAL").unwrap();
            panic!("interrupted mid-write");
        }));

        assert!(result.is_err());
        assert_eq!(node.content().unwrap(), b"old");
        assert_eq!(node.size().unwrap(), 3);
    }

    #[test]
    fn test_close_twice() {
        let (_dir, repo) = test_repo();
        let node = repo
            .root_node()
            .unwrap()
            .add_node("f", NodeKind::Resource)
            .unwrap();
        let mut writer = node.open_write().unwrap();
        writer.write_all(b"x").unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert_eq!(node.content().unwrap(), b"x");
    }

    #[test]
    fn test_delete_collection() {
        let (dir, repo) = test_repo();
        let root = repo.root_node().unwrap();
        let a = root.add_node("a", NodeKind::Collection).unwrap();
        a.add_node("b", NodeKind::Resource).unwrap();

        repo.delete_node("/a").unwrap();

        assert!(!repo.exists("/a"));
        assert!(!repo.exists("/a/b"));
        assert!(!dir.path().join("content/a").exists());
        assert!(!dir.path().join("meta/a.meta").exists());
        assert!(root.children().unwrap().is_empty());
        assert!(root.delete().is_err());
    }

    #[test]
    fn test_split_nested_collection() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path())
            .with_split(crate::split::SplitConfig::new(vec!["/users/".into()], 2, 3));
        let repo = Repository::new(config).unwrap();

        let users = repo
            .root_node()
            .unwrap()
            .add_node("users", NodeKind::Collection)
            .unwrap();
        let alice = users.add_node("alice", NodeKind::Collection).unwrap();
        let bob = users.add_node("bob.txt", NodeKind::Resource).unwrap();
        alice
            .add_node("x.txt", NodeKind::Resource)
            .unwrap()
            .write_content(b"x")
            .unwrap();
        alice.add_node("docs", NodeKind::Collection).unwrap();
        assert!(dir.path().join("content/users/ali/ce+/-x.txt").is_file());

        let paths = |node: &Node| -> Vec<String> {
            node.children()
                .unwrap()
                .iter()
                .map(|c| c.path().to_string())
                .collect()
        };
        assert_eq!(paths(&alice), vec!["/users/alice/docs", "/users/alice/x.txt"]);
        assert_eq!(paths(&users), vec!["/users/alice", "/users/bob.txt"]);

        alice.delete().unwrap();

        assert!(!repo.exists("/users/alice"));
        assert!(!repo.exists("/users/alice/x.txt"));
        assert!(!repo.exists("/users/alice/docs"));
        assert!(!dir.path().join("content/users/ali").exists());
        assert!(!dir.path().join("meta/users/ali").exists());
        assert_eq!(users.children().unwrap(), vec![bob]);
    }

    #[derive(Default)]
    struct RecordingIndexer {
        events: Mutex<Vec<String>>,
    }

    impl crate::indexer::Indexer for RecordingIndexer {
        fn index(&self, node: &Node) -> Result<()> {
            self.events.lock().unwrap().push(format!("index {}", node.path()));
            Ok(())
        }

        fn index_property(&self, node: &Node, property: &Property) -> Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(format!("prop {} {}", node.path(), property.name));
            // failures never reach the caller
            Err(Error::NodeNotFound("indexer down".into()))
        }

        fn remove_from_index(&self, node: &Node) -> Result<()> {
            self.events.lock().unwrap().push(format!("remove {}", node.path()));
            Ok(())
        }

        fn remove_property_from_index(&self, node: &Node, name: &str) -> Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(format!("unprop {} {}", node.path(), name));
            Ok(())
        }
    }

    #[test]
    fn test_indexer_notifications() {
        let dir = tempdir().unwrap();
        let mut config = Config::new(dir.path());
        config.auto_index = true;
        let repo = Repository::new(config).unwrap();
        let indexer = Arc::new(RecordingIndexer::default());
        repo.set_indexer(indexer.clone());

        let node = repo
            .root_node()
            .unwrap()
            .add_node("f", NodeKind::Resource)
            .unwrap();
        node.write_content(b"x").unwrap();
        node.set_property("k", "v").unwrap();
        node.remove_property("k").unwrap();
        node.delete().unwrap();

        let events = indexer.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec!["index /f", "index /f", "prop /f k", "unprop /f k", "remove /f"]
        );
    }

    #[test]
    fn test_indexer_disabled_without_auto_index() {
        let (_dir, repo) = test_repo();
        let indexer = Arc::new(RecordingIndexer::default());
        repo.set_indexer(indexer.clone());
        repo.root_node()
            .unwrap()
            .add_node("f", NodeKind::Resource)
            .unwrap();
        assert!(indexer.events.lock().unwrap().is_empty());
    }
}
