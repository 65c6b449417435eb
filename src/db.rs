//! The build-state log stores information about outputs produced by previous
//! builds, for determining which outputs are still up to date.
//!
//! The log is a file of JSON lines, one record per completed output.  Later
//! records for the same path replace earlier ones.

use crate::config::Config;
use crate::env::Environment;
use crate::hash::{stamp_fingerprint, Fingerprint};
use crate::job::JobSpec;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the log at the build root.
pub const DB_FILE: &str = ".jobgraph_db";

/// Don't bother compacting logs smaller than this many records.
const MIN_COMPACT_RECORDS: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("{path}:{line}: {source}")]
    Parse {
        path: String,
        line: usize,
        source: serde_json::Error,
    },
    #[error("encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What was known about an output when its job last completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub path: String,
    /// Name of the producer whose job made the output.
    pub job: String,
    pub input: String,
    pub config_id: Fingerprint,
    pub input_stamp: Fingerprint,
    pub output_stamp: Fingerprint,
    /// Stamps of files the job read besides its input, e.g. headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dep_stamps: BTreeMap<String, Fingerprint>,
    #[serde(default, skip_serializing_if = "Config::is_empty")]
    pub extra: Config,
}

pub struct Db {
    /// None for a log that is never persisted.
    path: Option<String>,
    records: FxHashMap<String, Record>,
    /// Encoded records not yet appended to the file.
    unwritten: Vec<u8>,
}

impl Db {
    pub fn in_memory() -> Self {
        Db {
            path: None,
            records: FxHashMap::default(),
            unwritten: Vec::new(),
        }
    }

    /// Load the log at `path`, or start an empty one if it doesn't exist.
    pub fn open(env: &dyn Environment, path: &str) -> Result<Self, DbError> {
        let io_err = |source| DbError::Io {
            path: path.to_owned(),
            source,
        };
        let mut db = Db {
            path: Some(path.to_owned()),
            ..Db::in_memory()
        };
        if !env.exists(path).map_err(io_err)? {
            return Ok(db);
        }

        let bytes = env.read(path).map_err(io_err)?;
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str::<Record>(line) {
                Ok(record) => {
                    db.records.insert(record.path.clone(), record);
                }
                // A torn final line is what an interrupted build leaves behind.
                Err(err) if i + 1 == lines.len() => {
                    tracing::warn!(path, line = i + 1, %err, "ignoring truncated record");
                }
                Err(source) => {
                    return Err(DbError::Parse {
                        path: path.to_owned(),
                        line: i + 1,
                        source,
                    })
                }
            }
        }

        let stale = lines.len() - db.records.len();
        if lines.len() >= MIN_COMPACT_RECORDS && stale > db.records.len() {
            tracing::info!(path, live = db.records.len(), stale, "compacting");
            db.compact(env)?;
        }
        Ok(db)
    }

    fn compact(&mut self, env: &dyn Environment) -> Result<(), DbError> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => return Ok(()),
        };
        let mut records: Vec<&Record> = self.records.values().collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }
        env.write(&path, &buf)
            .map_err(|source| DbError::Io { path, source })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&Record> {
        self.records.get(path)
    }

    /// Paths of every output recorded.
    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Add a record.  It reaches the file on the next flush().
    pub fn record(&mut self, record: Record) -> Result<(), DbError> {
        serde_json::to_writer(&mut self.unwritten, &record)?;
        self.unwritten.push(b'\n');
        self.records.insert(record.path.clone(), record);
        Ok(())
    }

    pub fn flush(&mut self, env: &dyn Environment) -> Result<(), DbError> {
        let path = match &self.path {
            Some(path) => path,
            None => {
                self.unwritten.clear();
                return Ok(());
            }
        };
        if self.unwritten.is_empty() {
            return Ok(());
        }
        env.append(path, &self.unwritten)
            .map_err(|source| DbError::Io {
                path: path.clone(),
                source,
            })?;
        self.unwritten.clear();
        Ok(())
    }

    /// Files `job` reads besides its input: the `deps` lists in its own
    /// extra data, plus those recorded for its dependency listing.
    pub fn dependencies(&self, job: &JobSpec, extras: &[(String, Config)]) -> Vec<String> {
        let listing = job
            .deps_file()
            .and_then(|path| self.records.get(&path))
            .map(|record| &record.extra);
        let mut deps = Vec::new();
        for extra in extras.iter().map(|(_, extra)| extra).chain(listing) {
            for dep in extra.get_strings(&["deps"]).unwrap_or_default() {
                if dep != job.input && !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
        }
        deps
    }

    /// If every output of `job` is up to date with respect to its input,
    /// configuration and dependencies, the extra data recorded for each
    /// output.
    pub fn fresh(
        &self,
        env: &dyn Environment,
        job: &JobSpec,
        input_stamp: Fingerprint,
    ) -> std::io::Result<Option<Vec<(String, Config)>>> {
        let config_id = job.config_id();
        let mut extras = Vec::with_capacity(job.outputs.len());
        for out in &job.outputs {
            let record = match self.records.get(out) {
                Some(record) => record,
                None => return Ok(None),
            };
            if record.job != job.name
                || record.input != job.input
                || record.config_id != config_id
                || record.input_stamp != input_stamp
            {
                return Ok(None);
            }
            let stamp = match env.stat(out)? {
                Some(stamp) => stamp,
                None => return Ok(None),
            };
            if stamp_fingerprint(out, Some(stamp)) != record.output_stamp {
                return Ok(None);
            }
            extras.push((out.clone(), record.extra.clone()));
        }

        let deps = self.dependencies(job, &extras);
        for out in &job.outputs {
            let recorded = match self.records.get(out) {
                Some(record) => &record.dep_stamps,
                None => return Ok(None),
            };
            for dep in &deps {
                let stamp = stamp_fingerprint(dep, env.stat(dep)?);
                if recorded.get(dep) != Some(&stamp) {
                    tracing::debug!(path = %out, %dep, "dependency changed");
                    return Ok(None);
                }
            }
        }
        Ok(Some(extras))
    }
}
