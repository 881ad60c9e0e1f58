use crate::error::SettingsError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// One immutable generation of scoped settings: `scope.name` → value.
/// Keys are case-sensitive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScopedSettings {
    values: BTreeMap<String, String>,
}

impl ScopedSettings {
    pub fn from_map(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// Parse a settings document. Accepts a flat object
    /// (`{"aws.region": "…"}`), one level of nesting
    /// (`{"aws": {"region": "…"}}`), or a mix of both.
    pub fn from_json(doc: &Value) -> Result<Self, SettingsError> {
        let object = doc
            .as_object()
            .ok_or_else(|| SettingsError::Malformed("top level must be an object".to_string()))?;

        let mut values = BTreeMap::new();
        for (key, value) in object {
            match value {
                Value::String(s) => {
                    values.insert(key.clone(), s.clone());
                }
                Value::Object(scope) => {
                    for (name, nested) in scope {
                        let Some(s) = nested.as_str() else {
                            return Err(SettingsError::Malformed(format!(
                                "value of '{key}.{name}' must be a string"
                            )));
                        };
                        values.insert(format!("{key}.{name}"), s.to_string());
                    }
                }
                _ => {
                    return Err(SettingsError::Malformed(format!(
                        "value of '{key}' must be a string or an object of strings"
                    )));
                }
            }
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Settings store: loaded once at startup, read-only during request
/// handling, replaced wholesale by an explicit administrative reload.
pub struct SettingsStore {
    path: PathBuf,
    snapshot: RwLock<Arc<ScopedSettings>>,
}

impl SettingsStore {
    /// Load settings from a JSON file, failing if it is missing.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let settings = Self::read(&path).await?;
        log::info!("Loaded {} settings from {:?}", settings.len(), path);
        Ok(Self {
            path,
            snapshot: RwLock::new(Arc::new(settings)),
        })
    }

    /// Load settings, treating a missing file as an empty store. Launch
    /// templates without placeholders still resolve; anything else fails
    /// later with the offending placeholder named.
    pub async fn load_or_empty(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            log::warn!("Settings file {:?} not found, starting empty", path);
            return Ok(Self {
                path,
                snapshot: RwLock::new(Arc::new(ScopedSettings::default())),
            });
        }
        Self::load(path).await
    }

    async fn read(path: &Path) -> Result<ScopedSettings, SettingsError> {
        if !path.exists() {
            return Err(SettingsError::NotFound(path.to_path_buf()));
        }
        let raw = tokio::fs::read_to_string(path).await?;
        let doc: Value = serde_json::from_str(&raw)
            .map_err(|e| SettingsError::Malformed(e.to_string()))?;
        ScopedSettings::from_json(&doc)
    }

    pub fn snapshot(&self) -> Arc<ScopedSettings> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Administrative reload; on failure the previous generation stays.
    pub async fn reload(&self) -> Result<Arc<ScopedSettings>, SettingsError> {
        let next = Arc::new(Self::read(&self.path).await?);
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = next.clone();
        log::info!("Settings reloaded: {} entries", next.len());
        Ok(next)
    }
}
