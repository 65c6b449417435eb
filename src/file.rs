//! The file registry: one record per file the build has heard of, whether a
//! source on disk or an output some job will produce.

use crate::canon::canon_rel_path;
use crate::config::{self, Config, ConfigError};
use crate::env::Environment;
use crate::hash::{Fingerprint, FingerprintBuilder};
use crate::job::JobId;
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct FileId(usize);
impl FileId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("invalid path {0:?}: must be relative to the build root")]
    InvalidPath(String),
    #[error("stat {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0} was not produced")]
    Missing(String),
}

#[derive(Debug)]
pub struct FileInfo {
    /// Canonical path relative to the build root.
    pub path: String,
    /// The path as passed on command lines.
    pub cmd_path: String,
    /// Config captured when the file was first discovered, from its sidecar.
    source_config: Config,
    /// Config accumulated from the jobs that completed this file.
    computed_config: Config,
    is_source: bool,
    completed: bool,
    producer: Option<JobId>,
}

impl FileInfo {
    pub fn source_config(&self) -> &Config {
        &self.source_config
    }

    pub fn computed_config(&self) -> &Config {
        &self.computed_config
    }

    pub fn is_source(&self) -> bool {
        self.is_source
    }

    /// The job that completed this file, if it was produced in this run.
    pub fn producer(&self) -> Option<JobId> {
        self.producer
    }

    /// Fingerprint of everything known about the file's configuration.
    pub fn config_fingerprint(&self) -> Fingerprint {
        FingerprintBuilder::new()
            .write_fingerprint(self.source_config.fingerprint())
            .write_fingerprint(self.computed_config.fingerprint())
            .finish()
    }
}

/// Owns every `FileInfo`; everything else refers to files by `FileId`.
#[derive(Default)]
pub struct Files {
    files: Vec<FileInfo>,
    by_path: FxHashMap<String, FileId>,
    /// Paths recorded as outputs of earlier builds.  These are not sources
    /// even when present on disk.
    produced: FxHashSet<String>,
}

impl Files {
    pub fn new() -> Self {
        Files::default()
    }

    /// A registry that knows which on-disk files earlier builds produced.
    pub fn with_produced<I: IntoIterator<Item = String>>(produced: I) -> Self {
        Files {
            produced: produced.into_iter().collect(),
            ..Files::default()
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn file(&self, id: FileId) -> &FileInfo {
        &self.files[id.index()]
    }

    pub fn path(&self, id: FileId) -> &str {
        &self.files[id.index()].path
    }

    pub fn lookup(&self, path: &str) -> Option<FileId> {
        let canon = canon_rel_path(path)?;
        self.by_path.get(&canon).copied()
    }

    /// Get the file for a path, registering it on first sight.  A newly seen
    /// file that exists on disk and was not produced by an earlier build is a
    /// source, and is complete from the start.
    pub fn get(&mut self, env: &dyn Environment, path: &str) -> Result<FileId, FileError> {
        let canon = canon_rel_path(path).ok_or_else(|| FileError::InvalidPath(path.to_owned()))?;
        if let Some(&id) = self.by_path.get(&canon) {
            return Ok(id);
        }

        let exists = env.exists(&canon).map_err(|source| FileError::Io {
            path: canon.clone(),
            source,
        })?;
        let is_source = exists && !self.produced.contains(&canon);
        let source_config = config::load_sidecar(env, &canon)?;

        let id = FileId(self.files.len());
        self.files.push(FileInfo {
            cmd_path: env.cmd_path(&canon),
            path: canon.clone(),
            source_config,
            computed_config: Config::new(),
            is_source,
            completed: is_source,
            producer: None,
        });
        self.by_path.insert(canon, id);
        Ok(id)
    }

    pub fn is_complete(&self, id: FileId) -> bool {
        self.files[id.index()].completed
    }

    /// Mark a file complete.  The file must exist on disk; `extra` is merged
    /// into its computed config.  Completing a file twice is a bug.
    pub fn complete(
        &mut self,
        env: &dyn Environment,
        id: FileId,
        job: Option<JobId>,
        extra: &Config,
    ) -> Result<(), FileError> {
        let file = &mut self.files[id.index()];
        if file.completed {
            panic!("{} completed twice", file.path);
        }
        let exists = env.exists(&file.path).map_err(|source| FileError::Io {
            path: file.path.clone(),
            source,
        })?;
        if !exists {
            return Err(FileError::Missing(file.path.clone()));
        }
        file.computed_config.merge(extra);
        file.producer = job;
        file.completed = true;
        Ok(())
    }

    /// Treat an on-disk file as a source after all: it was produced by an
    /// earlier build, but nothing knows how to produce it any more.
    pub fn promote_to_source(&mut self, id: FileId) {
        let file = &mut self.files[id.index()];
        if file.completed {
            panic!("{} completed twice", file.path);
        }
        file.is_source = true;
        file.completed = true;
    }
}
