//! Record persistence.
//!
//! Each record family lives in one JSON file rewritten as a whole on every
//! mutation. Writes go to a temporary file first and are renamed over the
//! previous version, so an interrupted write never corrupts the last fully
//! written state. A missing or undecodable file loads as an empty
//! collection.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::ledger::Activation;
use crate::user::User;

const USERS_FILE: &str = "users.json";
const ACTIVATIONS_FILE: &str = "activations.json";

/// One persisted record family.
///
/// The in-memory vector is authoritative between saves; every mutation runs
/// under the collection lock and persists before the lock is released, which
/// is what makes the ledger's check-then-insert effectively atomic.
pub struct Collection<T> {
    path: PathBuf,
    records: Mutex<Vec<T>>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Clone + Send,
{
    /// Open a collection file, loading whatever valid state it holds.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = Self::load(&path);
        Self {
            path,
            records: Mutex::new(records),
        }
    }

    fn load(path: &Path) -> Vec<T> {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(records) => records,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "undecodable collection file, starting empty");
                    Vec::new()
                },
            },
            Err(_) => Vec::new(),
        }
    }

    /// Snapshot of every record, in insertion order.
    pub async fn all(&self) -> Vec<T> {
        self.records.lock().await.clone()
    }

    /// Run a read-only closure against the records under the lock.
    pub async fn read<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        let records = self.records.lock().await;
        f(&records)
    }

    /// Run a mutating closure under the lock and persist the result before
    /// releasing it. The closure's return value is handed back to the
    /// caller, so check-then-insert patterns stay atomic.
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> Result<R> {
        let mut records = self.records.lock().await;
        let out = f(&mut records);
        self.persist(&records)?;
        Ok(out)
    }

    /// Serialized bytes of the current state, for raw exports.
    pub async fn export(&self) -> Result<Vec<u8>> {
        let records = self.records.lock().await;
        Ok(serde_json::to_vec_pretty(&*records)?)
    }

    fn persist(&self, records: &[T]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Both record families, opened from the configured data directory.
pub struct Store {
    pub users: Collection<User>,
    pub activations: Collection<Activation>,
}

impl Store {
    /// Open (creating the directory if needed) the user and activation
    /// collections.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            users: Collection::open(data_dir.join(USERS_FILE)),
            activations: Collection::open(data_dir.join(ACTIVATIONS_FILE)),
        })
    }
}
