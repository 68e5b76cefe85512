//! Preference storage port.
//!
//! The theme controller only sees [`PreferenceStore`]; the CLI and server
//! inject a [`JsonFileStore`], tests use [`MemoryStore`].

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{PaperError, Result};

/// Durable string key-value store.
pub trait PreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

/// Volatile store, lost when dropped.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Store persisted as a flat JSON object of strings.
///
/// Every call re-reads the file, so several processes sharing one file see
/// each other's writes (last write wins). A missing file reads as empty.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(text) => decode_prefs(&self.path, &text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(source) => Err(PaperError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl PreferenceStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    /// Read-modify-write; the new contents land through a rename so readers
    /// never observe a truncated file.
    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut values = self.load()?;
        values.insert(key.to_owned(), value.to_owned());
        let json = serde_json::to_string_pretty(&values).map_err(|source| PaperError::Prefs {
            path: self.path.clone(),
            source,
        })?;
        let write_err = |source| PaperError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(write_err)?;
        }
        let tmp = self.path.with_extension(format!("tmp-{}", std::process::id()));
        fs::write(&tmp, json + "\n").map_err(write_err)?;
        if let Err(source) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(write_err(source));
        }
        log::debug!("[prefs] path={} key={key}", self.path.display());
        Ok(())
    }
}

/// Parse preference file contents read from `path`. Blank text is empty.
pub fn decode_prefs(path: &Path, text: &str) -> Result<BTreeMap<String, String>> {
    if text.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(text).map_err(|source| PaperError::Prefs {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve the preference file: explicit flag, then `PAPERDOC_PREFS`, then
/// `<config dir>/paperdoc/prefs.json`, then `./.paperdoc-prefs.json`.
pub fn default_prefs_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os("PAPERDOC_PREFS").map(PathBuf::from))
        .or_else(|| dirs::config_dir().map(|d| d.join("paperdoc").join("prefs.json")))
        .unwrap_or_else(|| PathBuf::from(".paperdoc-prefs.json"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
