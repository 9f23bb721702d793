//! Confines client-supplied filenames to the served root directory.

use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// The filesystem queries path resolution needs.
pub trait Filesystem {
    /// Resolve `.`, `..` and symlinks to an absolute path.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    /// Whether a directory entry exists at `path`, without following a final
    /// symlink.
    fn entry_exists(&self, path: &Path) -> bool;
}

/// The host filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct Os;

impl Filesystem for Os {
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        path.canonicalize()
    }

    fn entry_exists(&self, path: &Path) -> bool {
        path.symlink_metadata().is_ok()
    }
}

/// A canonical root directory that every resolved path must stay under.
#[derive(Debug, Clone)]
pub struct Sandbox<F = Os> {
    root: PathBuf,
    fs: F,
}

impl Sandbox<Os> {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Self::with_filesystem(root, Os)
    }
}

impl<F: Filesystem> Sandbox<F> {
    /// Canonicalize `root` once; it is never re-resolved afterwards.
    pub fn with_filesystem(root: impl AsRef<Path>, fs: F) -> Result<Self> {
        let root = fs.canonicalize(root.as_ref())?;
        Ok(Self { root, fs })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map `filename` to a canonical path strictly below the root.
    ///
    /// The target itself need not exist: a missing final component is
    /// appended to its canonicalized parent, so reads of missing files fail
    /// later at open time and writes may create them. An entry that exists
    /// but cannot be canonicalized (a dangling symlink, say) is rejected.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf> {
        let joined = self.root.join(filename);
        let resolved = match self.fs.canonicalize(&joined) {
            Ok(path) => path,
            Err(err) if err.kind() == ErrorKind::NotFound && !self.fs.entry_exists(&joined) => {
                self.resolve_missing(&joined)?
            }
            Err(err) => {
                tracing::debug!(path = %joined.display(), %err, "could not resolve path");
                return Err(Error::AccessViolation);
            }
        };

        if resolved == self.root || !resolved.starts_with(&self.root) {
            tracing::debug!(path = %resolved.display(), "path escapes the root");
            return Err(Error::AccessViolation);
        }
        Ok(resolved)
    }

    fn resolve_missing(&self, joined: &Path) -> Result<PathBuf> {
        let name = match joined.components().next_back() {
            Some(Component::Normal(name)) => name,
            _ => return Err(Error::AccessViolation),
        };
        let parent = joined.parent().ok_or(Error::AccessViolation)?;
        let parent = self
            .fs
            .canonicalize(parent)
            .map_err(|_| Error::AccessViolation)?;
        Ok(parent.join(name))
    }
}
