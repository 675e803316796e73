//! Migration sources - read-only file trees plus glob patterns
//!
//! Paths inside a tree are always relative and `/`-separated, whatever the
//! host platform, so patterns behave the same everywhere.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A read-only file tree migrations are discovered in
pub trait MigrationFs: Send + Sync + fmt::Debug {
    /// Every regular file in the tree, as relative `/`-separated paths
    fn files(&self) -> io::Result<Vec<String>>;

    /// Files below the directory `prefix`, with paths still relative to the tree root.
    ///
    /// An empty prefix is the whole tree.
    fn files_under(&self, prefix: &str) -> io::Result<Vec<String>> {
        let files = self.files()?;
        if prefix.is_empty() {
            return Ok(files);
        }
        let dir = format!("{}/", prefix);
        Ok(files.into_iter().filter(|path| path.starts_with(&dir)).collect())
    }

    /// Full contents of the file at `path`
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;
}

/// A directory on the local filesystem
///
/// Only the directory a listing starts from must be readable. Entries below it
/// that cannot be inspected (dangling links, unreadable directories, link
/// cycles) are skipped.
#[derive(Debug, Clone)]
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn list(&self, prefix: &str) -> io::Result<Vec<String>> {
        let start = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.root.join(prefix)
        };

        let entries = match fs::read_dir(&start) {
            Ok(entries) => entries,
            // A missing directory simply has nothing to match
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut visited = HashSet::new();
        if let Ok(canonical) = fs::canonicalize(&start) {
            visited.insert(canonical);
        }

        let mut files = Vec::new();
        self.walk(entries, prefix, &mut visited, &mut files);
        Ok(files)
    }

    fn walk(&self, entries: fs::ReadDir, prefix: &str, visited: &mut HashSet<PathBuf>, out: &mut Vec<String>) {
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(target: "devroach", dir = %prefix, error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let relative = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };

            // Follows symlinks, a linked directory is walked like a real one
            let path = entry.path();
            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::debug!(target: "devroach", path = %relative, error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            if metadata.is_file() {
                out.push(relative);
            } else if metadata.is_dir() {
                match fs::canonicalize(&path) {
                    Ok(canonical) if !visited.insert(canonical.clone()) => {
                        tracing::debug!(target: "devroach", path = %relative, "skipping directory already walked");
                        continue;
                    }
                    _ => {}
                }
                match fs::read_dir(&path) {
                    Ok(children) => self.walk(children, &relative, visited, out),
                    Err(e) => {
                        tracing::debug!(target: "devroach", path = %relative, error = %e, "skipping unreadable directory");
                    }
                }
            }
        }
    }
}

impl MigrationFs for DirFs {
    fn files(&self) -> io::Result<Vec<String>> {
        self.list("")
    }

    fn files_under(&self, prefix: &str) -> io::Result<Vec<String>> {
        if prefix.is_empty() {
            return self.list("");
        }
        if !is_valid_path(prefix) {
            return Ok(Vec::new());
        }
        self.list(prefix)
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        if !is_valid_path(path) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid migration path '{}'", path),
            ));
        }
        fs::read(self.root.join(path))
    }
}

/// Relative, `/`-separated, no empty, `.` or `..` elements
fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path.split('/').all(|part| !part.is_empty() && part != "." && part != "..")
}

/// An in-memory file tree, for tests and migrations embedded with `include_str!`
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), contents.into());
    }
}

impl MigrationFs for MemoryFs {
    fn files(&self) -> io::Result<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no such file '{}'", path))
        })
    }
}

/// A file tree and the ordered glob patterns selecting migrations from it
#[derive(Debug, Clone)]
pub struct MigrationSource {
    fs: Arc<dyn MigrationFs>,
    patterns: Vec<String>,
}

impl MigrationSource {
    pub fn new<F, I, S>(fs: F, patterns: I) -> Self
    where
        F: MigrationFs + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_shared(Arc::new(fs), patterns)
    }

    pub fn from_shared<I, S>(fs: Arc<dyn MigrationFs>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fs,
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// Migrations under a directory on disk
    pub fn from_dir<I, S>(root: impl Into<PathBuf>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(DirFs::new(root), patterns)
    }

    pub fn fs(&self) -> &dyn MigrationFs {
        self.fs.as_ref()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
