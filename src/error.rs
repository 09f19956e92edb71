//! Error type shared by the data loader, the model builder and the artifact store.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum Error {
    /// Filesystem failure, tagged with the path that was being accessed.
    Io { path: PathBuf, source: io::Error },
    /// The dataset files exist but do not hold well-formed MNIST data.
    Dataset(String),
    /// An architecture description failed validation.
    Architecture(String),
    /// A saved model cannot be used by this build.
    Artifact(String),
    Serialization(serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Error::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Error::Dataset(msg) => write!(f, "invalid dataset: {msg}"),
            Error::Architecture(msg) => write!(f, "invalid architecture: {msg}"),
            Error::Artifact(msg) => write!(f, "incompatible model artifact: {msg}"),
            Error::Serialization(err) => write!(f, "serialization failed: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { source, .. } => Some(source),
            Error::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_io_error_mentions_path() {
        let err = Error::io(
            Path::new("data/train-images.idx3-ubyte"),
            io::Error::new(io::ErrorKind::NotFound, "No such file"),
        );
        let msg = err.to_string();
        assert!(msg.contains("data/train-images.idx3-ubyte"));
        assert!(msg.contains("No such file"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_message_variants_have_no_source() {
        let err = Error::Artifact("format_version 7".to_string());
        assert_eq!(
            err.to_string(),
            "incompatible model artifact: format_version 7"
        );
        assert!(err.source().is_none());
    }
}
