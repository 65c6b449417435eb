//! The environment a build runs in: the file system under the build root and
//! the ability to spawn processes.
//!
//! The scheduler and jobs only talk to the outside world through the
//! `Environment` trait, so tests can substitute an in-memory implementation.

use crate::process::{self, CommandLine, ProcessOutput};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Stamp info gathered for an existing file.  A missing file is modeled as
/// `None` wherever a stamp is optional.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileStamp {
    pub mtime_nanos: u128,
    pub len: u64,
}

/// Capabilities the build needs from its surroundings.  All paths are
/// relative to the build root.
pub trait Environment: Send + Sync {
    /// stat() a path, producing None if the file is absent.
    fn stat(&self, path: &str) -> std::io::Result<Option<FileStamp>>;

    fn exists(&self, path: &str) -> std::io::Result<bool> {
        Ok(self.stat(path)?.is_some())
    }

    fn read(&self, path: &str) -> std::io::Result<Vec<u8>>;

    /// Write a file, creating parent directories as needed.
    fn write(&self, path: &str, content: &[u8]) -> std::io::Result<()>;

    /// Append to a file, creating it (and its parent directories) if needed.
    fn append(&self, path: &str, content: &[u8]) -> std::io::Result<()>;

    /// Ensure the directory that will hold `path` exists.
    fn create_parent_dirs(&self, path: &str) -> std::io::Result<()>;

    /// The path string to pass on a command line to refer to `path`.
    fn cmd_path(&self, path: &str) -> String;

    /// Run a command with the build root as working directory.
    fn spawn(&self, cmd: &CommandLine) -> std::io::Result<ProcessOutput>;

    /// All regular files under the root, as canonical relative paths.
    fn list_files(&self) -> std::io::Result<Vec<String>>;
}

/// The real file system, rooted at a directory.
pub struct RealEnvironment {
    root: PathBuf,
}

impl RealEnvironment {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RealEnvironment { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn abs(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl Environment for RealEnvironment {
    fn stat(&self, path: &str) -> std::io::Result<Option<FileStamp>> {
        match std::fs::metadata(self.abs(path)) {
            Ok(meta) => {
                let mtime = meta.modified()?;
                let mtime_nanos = mtime
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_nanos())
                    .unwrap_or(0);
                Ok(Some(FileStamp {
                    mtime_nanos,
                    len: meta.len(),
                }))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.abs(path))
    }

    fn write(&self, path: &str, content: &[u8]) -> std::io::Result<()> {
        self.create_parent_dirs(path)?;
        std::fs::write(self.abs(path), content)
    }

    fn append(&self, path: &str, content: &[u8]) -> std::io::Result<()> {
        use std::io::Write;
        self.create_parent_dirs(path)?;
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.abs(path))?;
        f.write_all(content)
    }

    fn create_parent_dirs(&self, path: &str) -> std::io::Result<()> {
        match self.abs(path).parent() {
            Some(dir) => std::fs::create_dir_all(dir),
            None => Ok(()),
        }
    }

    fn cmd_path(&self, path: &str) -> String {
        // Commands run with the root as cwd, so relative paths work as is,
        // but a bare "foo" must become "./foo" to be executable.
        if path.contains('/') {
            path.to_owned()
        } else {
            format!("./{}", path)
        }
    }

    fn spawn(&self, cmd: &CommandLine) -> std::io::Result<ProcessOutput> {
        process::run_command(&self.root, cmd)
    }

    fn list_files(&self) -> std::io::Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            if let Some(rel) = rel.to_str() {
                files.push(crate::canon::canon_path(rel));
            }
        }
        Ok(files)
    }
}
