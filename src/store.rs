use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::eth::Address;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("state store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Keyed by miner address.
    Registrations,
    /// Keyed by lease token.
    Leases,
}

pub trait StateStore: Send + Sync {
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<Value>, StoreError>;
    fn set(&self, ns: Namespace, key: &str, value: Value) -> Result<(), StoreError>;
    fn delete(&self, ns: Namespace, key: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRecord {
    pub miner_address: Address,
    pub agent_public_key: String,
    pub server_nonce: String,
    pub registered_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    pub miner_address: Address,
    pub issued_at: i64,
    pub expires_at: i64,
}

pub fn record_registration(store: &dyn StateStore, rec: &RegistrationRecord) -> Result<(), StoreError> {
    store.set(Namespace::Registrations, &rec.miner_address.to_string(), serde_json::to_value(rec)?)
}

pub fn find_registration(store: &dyn StateStore, miner: &Address) -> Result<Option<RegistrationRecord>, StoreError> {
    typed(store.get(Namespace::Registrations, &miner.to_string())?)
}

pub fn record_lease(store: &dyn StateStore, token: &str, rec: &LeaseRecord) -> Result<(), StoreError> {
    store.set(Namespace::Leases, token, serde_json::to_value(rec)?)
}

pub fn find_lease(store: &dyn StateStore, token: &str) -> Result<Option<LeaseRecord>, StoreError> {
    typed(store.get(Namespace::Leases, token)?)
}

fn typed<T: DeserializeOwned>(value: Option<Value>) -> Result<Option<T>, StoreError> {
    value.map(serde_json::from_value).transpose().map_err(StoreError::from)
}

/// On-disk layout: `{"registrations": {...}, "leases": {...}}`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default)]
    pub registrations: BTreeMap<String, Value>,
    #[serde(default)]
    pub leases: BTreeMap<String, Value>,
}

impl StateDocument {
    fn map(&self, ns: Namespace) -> &BTreeMap<String, Value> {
        match ns {
            Namespace::Registrations => &self.registrations,
            Namespace::Leases => &self.leases,
        }
    }

    fn map_mut(&mut self, ns: Namespace) -> &mut BTreeMap<String, Value> {
        match ns {
            Namespace::Registrations => &mut self.registrations,
            Namespace::Leases => &mut self.leases,
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: Mutex<StateDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StateDocument>, StoreError> {
        self.doc.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl StateStore for MemoryStore {
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.lock()?.map(ns).get(key).cloned())
    }

    fn set(&self, ns: Namespace, key: &str, value: Value) -> Result<(), StoreError> {
        self.lock()?.map_mut(ns).insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, ns: Namespace, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.map_mut(ns).remove(key).is_some())
    }
}

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    doc: Mutex<StateDocument>,
}

impl FileStore {
    /// A missing or unreadable file starts out empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = match fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "state file unreadable, starting empty");
                StateDocument::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateDocument::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "state file unreadable, starting empty");
                StateDocument::default()
            }
        };
        Self { path, doc: Mutex::new(doc) }
    }

    // Mutates under the lock and persists before releasing it.
    fn update<R>(&self, f: impl FnOnce(&mut StateDocument) -> R) -> Result<R, StoreError> {
        let mut doc = self.doc.lock().map_err(|_| StoreError::Poisoned)?;
        let out = f(&mut doc);
        write_owner_only(&self.path, &serde_json::to_vec_pretty(&*doc)?)?;
        Ok(out)
    }
}

impl StateStore for FileStore {
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<Value>, StoreError> {
        let doc = self.doc.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(doc.map(ns).get(key).cloned())
    }

    fn set(&self, ns: Namespace, key: &str, value: Value) -> Result<(), StoreError> {
        self.update(|doc| {
            doc.map_mut(ns).insert(key.to_string(), value);
        })
    }

    fn delete(&self, ns: Namespace, key: &str) -> Result<bool, StoreError> {
        self.update(|doc| doc.map_mut(ns).remove(key).is_some())
    }
}

fn write_owner_only(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}
