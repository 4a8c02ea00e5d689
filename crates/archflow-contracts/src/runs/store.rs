use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Map, Value};

/// Small JSON document store keyed by string.
///
/// Reads always refresh from disk and writes merge only the keys this
/// instance touched, so two handles on the same file do not clobber each
/// other's rows. A file that exists but does not parse is an error, never
/// an empty store, and is left untouched.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
    payload: Option<Map<String, Value>>,
    dirty_keys: Vec<String>,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            payload: None,
            dirty_keys: Vec::new(),
        }
    }

    pub fn get(&mut self, key: &str) -> Result<Option<Map<String, Value>>> {
        Ok(self
            .ensure_loaded()?
            .get(key)
            .and_then(Value::as_object)
            .cloned())
    }

    pub fn keys_with_prefix(&mut self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .ensure_loaded()?
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    pub fn set(&mut self, key: &str, value: Map<String, Value>) -> Result<()> {
        self.set_many(vec![(key.to_string(), value)])
    }

    /// Stages every row and writes them with a single flush.
    pub fn set_many(&mut self, rows: Vec<(String, Map<String, Value>)>) -> Result<()> {
        let payload = self.ensure_loaded()?;
        let mut touched = Vec::new();
        for (key, value) in rows {
            let snapshot = Value::Object(value);
            if payload.get(&key) == Some(&snapshot) {
                continue;
            }
            payload.insert(key.clone(), snapshot);
            touched.push(key);
        }
        for key in touched {
            if !self.dirty_keys.contains(&key) {
                self.dirty_keys.push(key);
            }
        }
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.payload.is_none() || self.dirty_keys.is_empty() {
            return Ok(());
        }

        let mut on_disk = read_json_object(&self.path)?.unwrap_or_default();
        if let Some(payload) = &self.payload {
            for key in &self.dirty_keys {
                if let Some(value) = payload.get(key) {
                    on_disk.insert(key.clone(), value.clone());
                }
            }
        }
        write_json_object(&self.path, &on_disk)?;
        self.payload = Some(on_disk);
        self.dirty_keys.clear();
        Ok(())
    }

    fn ensure_loaded(&mut self) -> Result<&mut Map<String, Value>> {
        let fresh = read_json_object(&self.path)?.unwrap_or_default();
        Ok(self.payload.insert(fresh))
    }
}

/// `Ok(None)` when the file does not exist yet.
fn read_json_object(path: &Path) -> Result<Option<Map<String, Value>>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed reading {}", path.display()));
        }
    };
    let parsed: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    match parsed {
        Value::Object(map) => Ok(Some(map)),
        _ => anyhow::bail!("{} does not hold a JSON object", path.display()),
    }
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}
