//! Named scenarios persisted as one JSON file each.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::ScenarioParameters;

const EXTENSION: &str = "json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("scenario '{0}' not found")]
    NotFound(String),

    #[error("invalid scenario name '{0}'")]
    InvalidName(String),

    #[error("scenario '{name}' is corrupt: {source}")]
    Corrupt {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid scenario bundle: {0}")]
    InvalidBundle(#[source] serde_json::Error),

    #[error("scenario storage I/O failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Bundle {
    scenarios: BTreeMap<String, ScenarioParameters>,
}

#[derive(Debug, Clone)]
pub struct ScenarioStore {
    dir: PathBuf,
}

impl ScenarioStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `<dir>/<name>.json`, replacing any existing scenario of that name.
    pub fn save(&self, params: &ScenarioParameters) -> Result<PathBuf, StoreError> {
        validate_name(&params.name)?;
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&params.name);
        let json = serde_json::to_vec_pretty(params).map_err(|source| StoreError::Corrupt {
            name: params.name.clone(),
            source,
        })?;
        fs::write(&path, json)?;
        info!(name = %params.name, path = %path.display(), "scenario saved");
        Ok(path)
    }

    /// The file name is authoritative: the returned parameters carry `name`
    /// even if the stored document says otherwise.
    pub fn load(&self, name: &str) -> Result<ScenarioParameters, StoreError> {
        validate_name(name)?;
        let path = self.path_for(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut params: ScenarioParameters =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                name: name.to_string(),
                source,
            })?;
        params.name = name.to_string();
        Ok(params)
    }

    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) if validate_name(stem).is_ok() => names.push(stem.to_string()),
                _ => {}
            }
        }
        names.sort();
        Ok(names)
    }

    /// Returns whether a scenario was removed.
    pub fn delete(&self, name: &str) -> Result<bool, StoreError> {
        validate_name(name)?;
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => {
                info!(name, "scenario deleted");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes every saved scenario. Returns whether anything was removed.
    pub fn clear(&self) -> Result<bool, StoreError> {
        let mut removed = false;
        for name in self.list()? {
            removed |= self.delete(&name)?;
        }
        if removed {
            info!(dir = %self.dir.display(), "scenarios cleared");
        }
        Ok(removed)
    }

    /// All scenarios as one JSON document, or `None` when there are none.
    /// Scenarios that fail to load are skipped.
    pub fn export_bundle(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let mut scenarios = BTreeMap::new();
        for name in self.list()? {
            match self.load(&name) {
                Ok(params) => {
                    scenarios.insert(name, params);
                }
                Err(e) => warn!(name, error = %e, "skipping scenario in export"),
            }
        }
        if scenarios.is_empty() {
            return Ok(None);
        }

        let bytes = serde_json::to_vec_pretty(&Bundle { scenarios })
            .map_err(StoreError::InvalidBundle)?;
        Ok(Some(bytes))
    }

    /// Saves every scenario in `bytes`, overwriting same-named ones, and
    /// returns how many were imported. Bundle keys become scenario names.
    pub fn import_bundle(&self, bytes: &[u8]) -> Result<usize, StoreError> {
        let bundle: Bundle = serde_json::from_slice(bytes).map_err(StoreError::InvalidBundle)?;
        for name in bundle.scenarios.keys() {
            validate_name(name)?;
        }

        let count = bundle.scenarios.len();
        for (name, mut params) in bundle.scenarios {
            params.name = name;
            self.save(&params)?;
        }
        info!(count, "scenario bundle imported");
        Ok(count)
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{EXTENSION}"))
    }
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.trim().is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}
