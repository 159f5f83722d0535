use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, RwLock};

use tracing::info;

use crate::config::Config;
use crate::error::{Error, IoResultExt, Result};
use crate::indexer::Indexer;
use crate::node::Node;

const CONFIG_FILE: &str = "config.toml";

/// a filesystem-backed node repository
///
/// cheap to clone; clones share the lock table and indexer.
#[derive(Clone)]
pub struct Repository {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    ignore: Vec<glob::Pattern>,
    indexer: RwLock<Option<Arc<dyn Indexer>>>,
    locks: LockTable,
}

impl Repository {
    /// initialize a new repository at the given path
    pub fn init(path: &Path) -> Result<Self> {
        let config_path = path.join(CONFIG_FILE);
        if config_path.exists() {
            return Err(Error::RepoExists(path.to_path_buf()));
        }
        fs::create_dir_all(path).with_path(path)?;

        // stored relative so the repository can be moved
        Config::with_dirs("content", "meta").save(&config_path)?;
        Self::new(Config::new(path))
    }

    /// open an existing repository
    pub fn open(path: &Path) -> Result<Self> {
        let config_path = path.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(Error::NoRepo(path.to_path_buf()));
        }
        Self::new(Config::load(&config_path)?)
    }

    /// open a repository from an already parsed configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.content_dir).with_path(&config.content_dir)?;
        fs::create_dir_all(&config.meta_dir).with_path(&config.meta_dir)?;

        let ignore = config
            .ignore
            .iter()
            .map(|p| glob::Pattern::new(p).map_err(|e| Error::InvalidConfig(e.to_string())))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                ignore,
                indexer: RwLock::new(None),
                locks: LockTable::default(),
            }),
        })
    }

    /// repository configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// install the indexer notified when `auto_index` is enabled
    pub fn set_indexer(&self, indexer: Arc<dyn Indexer>) {
        let mut slot = self
            .inner
            .indexer
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *slot = Some(indexer);
    }

    /// the indexer, if one is installed and auto indexing is on
    pub fn indexer(&self) -> Option<Arc<dyn Indexer>> {
        if !self.inner.config.auto_index {
            return None;
        }
        self.inner
            .indexer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// the root collection
    pub fn root_node(&self) -> Result<Node> {
        self.get_node("/")
    }

    /// look up an existing node by path
    pub fn get_node(&self, path: &str) -> Result<Node> {
        let path = normalize_path(path)?;
        if !self.node_exists(&path) {
            return Err(Error::NodeNotFound(path));
        }
        Ok(Node::new(self.clone(), path))
    }

    /// look up an existing node by its stable id
    pub fn get_node_by_id(&self, id: &str) -> Result<Node> {
        // ids are derived from paths
        self.get_node(id)
    }

    /// check whether a node exists at the path
    pub fn exists(&self, path: &str) -> bool {
        normalize_path(path)
            .map(|p| self.node_exists(&p))
            .unwrap_or(false)
    }

    /// delete a node and everything below it
    pub fn delete_node(&self, path: &str) -> Result<()> {
        self.get_node(path)?.delete()
    }

    pub(crate) fn node_exists(&self, path: &str) -> bool {
        path == "/" || self.content_file(path).exists() || self.meta_file(path).exists()
    }

    pub(crate) fn is_ignored(&self, name: &str) -> bool {
        self.inner.ignore.iter().any(|p| p.matches(name))
    }

    /// block until no one else holds the node's lock
    pub(crate) fn lock_node(&self, id: &str) -> NodeLock<'_> {
        self.inner.locks.acquire(id)
    }

    // -- physical layout --

    /// physical form of a logical path
    pub(crate) fn physical(&self, path: &str) -> String {
        match &self.inner.config.split {
            Some(split) => split.split(path),
            None => path.to_string(),
        }
    }

    /// logical form of a physical path
    pub(crate) fn logical(&self, physical: &str) -> String {
        match &self.inner.config.split {
            Some(split) => split.unsplit(physical),
            None => physical.to_string(),
        }
    }

    fn content_for(&self, physical: &str) -> PathBuf {
        self.inner
            .config
            .content_dir
            .join(physical.trim_start_matches('/'))
    }

    fn meta_dir_for(&self, physical: &str) -> PathBuf {
        self.inner.config.meta_dir.join(format!(
            "{}{}",
            physical.trim_start_matches('/'),
            self.inner.config.meta_suffix
        ))
    }

    /// where new content for the path is written
    pub(crate) fn content_target(&self, path: &str) -> PathBuf {
        self.content_for(&self.physical(path))
    }

    /// content file to read, falling back to the unsplit layout
    pub(crate) fn content_file(&self, path: &str) -> PathBuf {
        let split = self.content_target(path);
        if split.exists() {
            return split;
        }
        let legacy = self.content_for(path);
        if legacy.exists() {
            legacy
        } else {
            split
        }
    }

    /// meta directory to read, falling back to the unsplit layout
    pub(crate) fn meta_dir(&self, path: &str) -> PathBuf {
        let split = self.meta_dir_for(&self.physical(path));
        if split.exists() {
            return split;
        }
        let legacy = self.meta_dir_for(path);
        if legacy.exists() {
            legacy
        } else {
            split
        }
    }

    /// meta directory to write; moves a legacy directory into the split layout
    pub(crate) fn meta_dir_for_write(&self, path: &str) -> Result<PathBuf> {
        let split = self.meta_dir_for(&self.physical(path));
        let legacy = self.meta_dir_for(path);
        if split != legacy && !split.exists() && legacy.exists() {
            info!(path, from = %legacy.display(), to = %split.display(), "migrating meta directory");
            if let Some(parent) = split.parent() {
                fs::create_dir_all(parent).with_path(parent)?;
            }
            fs::rename(&legacy, &split).with_path(&split)?;
        }
        Ok(split)
    }

    pub(crate) fn meta_file(&self, path: &str) -> PathBuf {
        self.meta_dir(path).join("meta")
    }

    pub(crate) fn content_root(&self) -> &Path {
        &self.inner.config.content_dir
    }

    pub(crate) fn meta_root(&self) -> &Path {
        &self.inner.config.meta_dir
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("content_dir", &self.inner.config.content_dir)
            .field("meta_dir", &self.inner.config.meta_dir)
            .finish()
    }
}

/// validate a logical path and strip a trailing slash
pub fn normalize_path(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(Error::InvalidPath(format!("path must be absolute: {}", path)));
    }
    if path == "/" {
        return Ok(path.to_string());
    }
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    for component in trimmed[1..].split('/') {
        if component.is_empty() {
            return Err(Error::InvalidPath(format!("path cannot contain '//': {}", path)));
        }
        if component == "." || component == ".." {
            return Err(Error::InvalidPath(format!(
                "path cannot contain '.' or '..': {}",
                path
            )));
        }
        if component.contains('\0') {
            return Err(Error::InvalidPath(format!(
                "path cannot contain null byte: {}",
                path
            )));
        }
    }
    Ok(trimmed.to_string())
}

/// per-node exclusive locks, keyed by node id
#[derive(Default)]
struct LockTable {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl LockTable {
    fn acquire(&self, id: &str) -> NodeLock<'_> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        while held.contains(id) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|e| e.into_inner());
        }
        held.insert(id.to_string());
        NodeLock {
            table: self,
            id: id.to_string(),
        }
    }
}

/// guard that holds a node lock until dropped
pub(crate) struct NodeLock<'a> {
    table: &'a LockTable,
    id: String,
}

impl Drop for NodeLock<'_> {
    fn drop(&mut self) {
        let mut held = self.table.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.id);
        self.table.released.notify_all();
    }
}
