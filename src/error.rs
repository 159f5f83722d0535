use std::path::PathBuf;

/// error type for repository operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("repository not found at {0}")]
    NoRepo(PathBuf),

    #[error("repository already exists at {0}")]
    RepoExists(PathBuf),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("revision {revision} not found for node {path}")]
    RevisionNotFound { path: String, revision: String },

    #[error("no revision of {path} carries tag {tag}")]
    TagNotFound { path: String, tag: String },

    #[error("property {name} not found on {path}")]
    PropertyNotFound { path: String, name: String },

    #[error("node {path} is already checked out by {user}")]
    AlreadyCheckedOut { path: String, user: String },

    #[error("node {0} is not checked out")]
    NotCheckedOut(String),

    #[error("node {0} is not a resource")]
    NotAResource(String),

    #[error("node {0} is not a collection")]
    NotACollection(String),

    #[error("invalid node path: {0}")]
    InvalidPath(String),

    #[error("invalid node name: {0}")]
    InvalidName(String),

    #[error("property {name} has type {actual}, not {expected}")]
    PropertyType {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("property type {0} is not supported")]
    UnsupportedPropertyType(String),

    #[error("corrupt meta file {path} line {line}: {message}")]
    CorruptMeta {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("unsupported meta format version {version} in {path}")]
    UnsupportedMetaVersion { path: PathBuf, version: String },

    #[error("date index entry {entry} points to missing revision {revision}")]
    IndexOutOfSync { entry: PathBuf, revision: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("writer for {0} is already closed")]
    WriterClosed(PathBuf),

    #[error("could not allocate a temporary file next to {0}")]
    TempFileExhausted(PathBuf),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

/// coarse classification of errors, for callers that branch on failure class
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    StateConflict,
    Corruption,
    Io,
    InvalidInput,
    Unsupported,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoRepo(_)
            | Error::NodeNotFound(_)
            | Error::RevisionNotFound { .. }
            | Error::TagNotFound { .. }
            | Error::PropertyNotFound { .. } => ErrorKind::NotFound,

            Error::AlreadyCheckedOut { .. }
            | Error::NotCheckedOut(_)
            | Error::RepoExists(_)
            | Error::NodeExists(_)
            | Error::WriterClosed(_) => ErrorKind::StateConflict,

            Error::CorruptMeta { .. }
            | Error::UnsupportedMetaVersion { .. }
            | Error::IndexOutOfSync { .. }
            | Error::Config(_) => ErrorKind::Corruption,

            Error::Io { .. } | Error::TempFileExhausted(_) | Error::ConfigSerialize(_) => {
                ErrorKind::Io
            }

            Error::NotAResource(_)
            | Error::NotACollection(_)
            | Error::InvalidPath(_)
            | Error::InvalidName(_)
            | Error::PropertyType { .. }
            | Error::InvalidConfig(_) => ErrorKind::InvalidInput,

            Error::UnsupportedPropertyType(_) => ErrorKind::Unsupported,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_state_conflict(&self) -> bool {
        self.kind() == ErrorKind::StateConflict
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}

/// true if the error is an io error of kind NotFound
pub(crate) fn is_io_not_found(err: &Error) -> bool {
    matches!(err, Error::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            Error::NodeNotFound("/a".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::AlreadyCheckedOut {
                path: "/a".into(),
                user: "alice".into()
            }
            .kind(),
            ErrorKind::StateConflict
        );
        assert!(Error::NotCheckedOut("/a".into()).is_state_conflict());
        assert_eq!(
            Error::UnsupportedMetaVersion {
                path: PathBuf::from("meta"),
                version: "9".into()
            }
            .kind(),
            ErrorKind::Corruption
        );
    }

    #[test]
    fn test_with_path() {
        let res: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "gone",
        ));
        let err = res.with_path("/tmp/x").unwrap_err();
        assert!(is_io_not_found(&err));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("/tmp/x"));
    }
}
