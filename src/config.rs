//! Configuration: per-file config objects, the sidecar files they are loaded
//! from, and the project-wide `jobgraph.json`.

use crate::env::Environment;
use crate::hash::{Fingerprint, FingerprintBuilder};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Suffix of the per-file sidecar holding a source file's config.
/// Sidecars are only ever hand-written; jobs never generate them.
pub const SIDECAR_SUFFIX: &str = ".jg.json";

/// Name of the project config at the build root.
pub const PROJECT_CONFIG: &str = "jobgraph.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("{path}: expected a JSON object")]
    NotAnObject { path: String },
}

/// A JSON object of job options and recorded facts about a file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config(Map<String, Value>);

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Config(map)),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up a nested entry, e.g. `get(&["cmd", "cc"])`.
    pub fn get(&self, keys: &[&str]) -> Option<&Value> {
        let (first, rest) = keys.split_first()?;
        let mut value = self.0.get(*first)?;
        for key in rest {
            value = value.as_object()?.get(*key)?;
        }
        Some(value)
    }

    /// Look up a nested list of strings.  Entries of the wrong type yield None.
    pub fn get_strings(&self, keys: &[&str]) -> Option<Vec<String>> {
        self.get(keys)?
            .as_array()?
            .iter()
            .map(|v| v.as_str().map(str::to_owned))
            .collect()
    }

    /// Merge `delta` into this config.  A key prefixed with `+` (or no prefix)
    /// appends arrays and merges objects, `-` removes the key, `=` replaces it.
    pub fn merge(&mut self, delta: &Config) {
        merge_map(&mut self.0, &delta.0);
    }

    pub fn fingerprint(&self) -> Fingerprint {
        FingerprintBuilder::new()
            .write_json(&Value::Object(self.0.clone()))
            .finish()
    }
}

impl From<Map<String, Value>> for Config {
    fn from(map: Map<String, Value>) -> Self {
        Config(map)
    }
}

impl serde::Serialize for Config {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&self.0, s)
    }
}

impl<'de> serde::Deserialize<'de> for Config {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Config(Map::deserialize(d)?))
    }
}

fn merge_map(base: &mut Map<String, Value>, delta: &Map<String, Value>) {
    for (key, value) in delta {
        if let Some(key) = key.strip_prefix('-') {
            base.remove(key);
        } else if let Some(key) = key.strip_prefix('=') {
            base.insert(key.to_owned(), value.clone());
        } else {
            let key = key.strip_prefix('+').unwrap_or(key);
            match (base.get_mut(key), value) {
                (Some(Value::Array(existing)), Value::Array(more)) => {
                    existing.extend(more.iter().cloned())
                }
                (Some(Value::Object(existing)), Value::Object(more)) => merge_map(existing, more),
                _ => {
                    base.insert(key.to_owned(), value.clone());
                }
            }
        }
    }
}

/// Load the sidecar config for `path`, if any.
pub fn load_sidecar(env: &dyn Environment, path: &str) -> Result<Config, ConfigError> {
    let sidecar = format!("{}{}", path, SIDECAR_SUFFIX);
    let exists = env.exists(&sidecar).map_err(|source| ConfigError::Io {
        path: sidecar.clone(),
        source,
    })?;
    if !exists {
        return Ok(Config::new());
    }
    let bytes = env.read(&sidecar).map_err(|source| ConfigError::Io {
        path: sidecar.clone(),
        source,
    })?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
        path: sidecar.clone(),
        source,
    })?;
    Config::from_value(value).ok_or(ConfigError::NotAnObject { path: sidecar })
}

/// Project-wide settings from `jobgraph.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    /// Targets built when none are named on the command line.
    pub targets: Vec<String>,
    pub workers: Option<usize>,
    pub keep_going: Option<usize>,
    pub tests: TestConfig,
    pub cmd: ToolConfig,
    /// Whether the compile/link/deps/test producers are registered.
    pub builtin_producers: bool,
    pub producers: Vec<ProducerDecl>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            targets: Vec::new(),
            workers: None,
            keep_going: None,
            tests: TestConfig::default(),
            cmd: ToolConfig::default(),
            builtin_producers: true,
            producers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestConfig {
    pub build_with_default_targets: bool,
    /// Source suffixes that mark a test program.
    pub suffixes: Vec<String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        TestConfig {
            build_with_default_targets: false,
            suffixes: vec![".test.c".to_owned(), ".test.cc".to_owned()],
        }
    }
}

/// Tool and default flags for each built-in job kind.  The first element is
/// the program.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub cc: Vec<String>,
    pub cxx: Vec<String>,
    pub link: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        ToolConfig {
            cc: vec!["cc".to_owned()],
            cxx: vec!["c++".to_owned()],
            link: vec!["cc".to_owned()],
        }
    }
}

/// A user-declared command producer.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProducerDecl {
    pub name: String,
    /// Input suffix, e.g. ".y".
    pub input: String,
    /// Output suffixes, e.g. [".tab.c", ".tab.h"].
    pub outputs: Vec<String>,
    /// Shell command; `$in`, `$out`, `$stem` and `$$` are expanded.
    pub command: String,
}

impl ProjectConfig {
    pub fn parse(path: &str, bytes: &[u8]) -> Result<Self, ConfigError> {
        serde_json::from_slice(bytes).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Load the project config, falling back to defaults if it is absent.
    pub fn load(env: &dyn Environment, path: &str) -> Result<Self, ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_owned(),
            source,
        };
        if !env.exists(path).map_err(io_err)? {
            return Ok(ProjectConfig::default());
        }
        let bytes = env.read(path).map_err(io_err)?;
        Self::parse(path, &bytes)
    }
}
