//! Registry Store: the static catalog of known tool servers.
//!
//! The registry is loaded wholesale from a versioned JSON document and is
//! read-only at request time. A reload parses the document off to the side
//! and swaps a single snapshot reference, so in-flight requests keep the
//! generation they started with.

use relay_protocol::{ServerDescriptor, REGISTRY_SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

mod error;

pub use error::{RegistryError, Result};

/// On-disk registry document.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistryDocument {
    pub schema_version: u32,
    /// Opaque version tag of the catalog, e.g. a content hash or date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub servers: Vec<ServerDescriptor>,
}

/// One immutable generation of the catalog.
///
/// Descriptor order is the document order; the similarity index relies on
/// it for deterministic tie-breaking.
#[derive(Debug)]
pub struct RegistrySnapshot {
    version: Option<String>,
    servers: Vec<ServerDescriptor>,
    by_id: HashMap<String, usize>,
}

impl TryFrom<RegistryDocument> for RegistrySnapshot {
    type Error = RegistryError;

    fn try_from(doc: RegistryDocument) -> Result<Self> {
        Self::from_document(doc)
    }
}

impl RegistrySnapshot {
    fn from_document(doc: RegistryDocument) -> Result<Self> {
        if doc.schema_version != REGISTRY_SCHEMA_VERSION {
            return Err(RegistryError::SchemaVersion {
                found: doc.schema_version,
                expected: REGISTRY_SCHEMA_VERSION,
            });
        }

        let mut by_id = HashMap::with_capacity(doc.servers.len());
        for (idx, server) in doc.servers.iter().enumerate() {
            if by_id.insert(server.id.clone(), idx).is_some() {
                return Err(RegistryError::DuplicateId(server.id.clone()));
            }
        }

        Ok(Self {
            version: doc.version,
            servers: doc.servers,
            by_id,
        })
    }

    pub fn get(&self, id: &str) -> Option<&ServerDescriptor> {
        self.by_id.get(id).map(|idx| &self.servers[*idx])
    }

    pub fn descriptors(&self) -> &[ServerDescriptor] {
        &self.servers
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// Handle to the current registry generation.
#[derive(Debug)]
pub struct ServerRegistry {
    path: PathBuf,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
}

impl ServerRegistry {
    /// Load the registry document from `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = Self::read_snapshot(&path).await?;
        log::info!(
            "Loaded {} servers from registry {:?} (version: {:?})",
            snapshot.len(),
            path,
            snapshot.version()
        );
        Ok(Self {
            path,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    async fn read_snapshot(path: &Path) -> Result<RegistrySnapshot> {
        if !path.exists() {
            return Err(RegistryError::NotFound(path.to_path_buf()));
        }
        let raw = tokio::fs::read_to_string(path).await?;
        let doc: RegistryDocument = serde_json::from_str(&raw)?;
        RegistrySnapshot::from_document(doc)
    }

    /// Current generation. Callers hold the returned `Arc` for the duration
    /// of one request and never observe a partial reload.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-read the document and replace the catalog wholesale. On failure
    /// the previous generation stays in place.
    pub async fn reload(&self) -> Result<Arc<RegistrySnapshot>> {
        let next = Arc::new(Self::read_snapshot(&self.path).await?);
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = next.clone();
        log::info!("Registry reloaded: {} servers", next.len());
        Ok(next)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
