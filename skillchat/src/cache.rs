//! Persistent local cache.
//!
//! Defines the [`CachePort`] trait, a key-scoped byte store injected into
//! the engine, plus [`SnapshotCache`] which layers typed, versioned
//! snapshots on top of any port.
//!
//! # Failure policy
//!
//! A cache is an accelerator, never a source of truth. If a read or write
//! fails (storage quota, I/O error, a snapshot written by an older build):
//! 1. The error is logged via `tracing::warn!`.
//! 2. The operation reports a miss (reads) or is dropped (writes).
//! 3. The caller falls through to the network as if no cache existed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use skillchat_proto::message::{ConversationId, Message, SequenceNumber, UserId};
use skillchat_proto::roster::{Contact, RosterContext};

/// Snapshot layout version. Bump when a cached struct changes shape.
const SNAPSHOT_VERSION: u16 = 1;

/// Errors that can occur in a cache backend.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backing storage failed.
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing would exceed the configured storage quota.
    #[error("cache quota exceeded: need {needed} bytes, quota {quota} bytes")]
    QuotaExceeded {
        /// Bytes the store would occupy after the write.
        needed: u64,
        /// Configured quota.
        quota: u64,
    },

    /// The backend is not usable at all.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// A key-scoped byte store that survives engine restarts within a session.
///
/// Implementations include:
/// - [`InMemoryCache`] for tests and ephemeral sessions
/// - [`FileCache`] for the console client
pub trait CachePort: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the backend rejects the write.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError>;

    /// Delete the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the backend cannot be modified.
    fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// In-memory implementation of [`CachePort`].
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryCache {
    /// Create a new, empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl CachePort for InMemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Directory-backed [`CachePort`]: one file per key.
///
/// Keys are escaped into file names, so any key is accepted. Writes go to
/// a temporary file first and are renamed into place.
#[derive(Debug)]
pub struct FileCache {
    dir: PathBuf,
    quota_bytes: Option<u64>,
}

impl FileCache {
    /// Open (and create if needed) a cache rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>, quota_bytes: Option<u64>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, quota_bytes })
    }

    /// Default location: `<user cache dir>/skillchat`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the platform has no cache dir.
    pub fn default_dir() -> Result<PathBuf, CacheError> {
        dirs::cache_dir()
            .map(|d| d.join("skillchat"))
            .ok_or_else(|| CacheError::Unavailable("no user cache directory".into()))
    }

    /// Returns the root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(escape_key(key))
    }

    /// Total bytes stored, excluding the file at `skip`.
    fn usage_excluding(&self, skip: &Path) -> Result<u64, CacheError> {
        let mut total = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path() == skip {
                continue;
            }
            let meta = entry.metadata()?;
            if meta.is_file() {
                total += meta.len();
            }
        }
        Ok(total)
    }
}

impl CachePort for FileCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(key);
        if let Some(quota) = self.quota_bytes {
            let needed = self.usage_excluding(&path)? + value.len() as u64;
            if needed > quota {
                return Err(CacheError::QuotaExceeded { needed, quota });
            }
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Escape a cache key into a portable file name.
fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Cached state of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    /// Server conversation id, once known.
    pub conversation_id: Option<ConversationId>,
    /// Highest sequence observed for the conversation.
    pub last_seen: SequenceNumber,
    /// Ordered message list.
    pub messages: Vec<Message>,
}

/// Versioned envelope around a snapshot payload.
#[derive(Serialize, Deserialize)]
struct Versioned<T> {
    version: u16,
    payload: T,
}

/// Typed, failure-tolerant snapshot storage over a [`CachePort`].
///
/// Keys are namespaced by the current user so a shared backend never
/// leaks one account's threads into another's session.
pub struct SnapshotCache<C: CachePort> {
    port: C,
    namespace: String,
}

impl<C: CachePort> SnapshotCache<C> {
    /// Wrap `port`, scoping every key to `user`.
    pub fn new(port: C, user: &UserId) -> Self {
        Self {
            port,
            namespace: format!("skillchat:{user}"),
        }
    }

    /// Returns the underlying port.
    pub const fn port(&self) -> &C {
        &self.port
    }

    fn thread_key(&self, partner: &UserId) -> String {
        format!("{}:thread:{partner}", self.namespace)
    }

    fn roster_key(&self, context: &RosterContext) -> String {
        format!("{}:roster:{context}", self.namespace)
    }

    /// Load the cached thread with `partner`; any failure is a miss.
    pub fn load_thread(&self, partner: &UserId) -> Option<ThreadSnapshot> {
        self.read(&self.thread_key(partner))
    }

    /// Persist the thread with `partner`; failures are logged and dropped.
    pub fn store_thread(&self, partner: &UserId, snapshot: &ThreadSnapshot) {
        self.write(&self.thread_key(partner), snapshot);
    }

    /// Load the cached roster for `context`; any failure is a miss.
    pub fn load_roster(&self, context: &RosterContext) -> Option<Vec<Contact>> {
        self.read(&self.roster_key(context))
    }

    /// Persist the roster for `context`; failures are logged and dropped.
    pub fn store_roster(&self, context: &RosterContext, contacts: &[Contact]) {
        self.write(&self.roster_key(context), &contacts);
    }

    /// Drop the roster snapshot for a context that is no longer current.
    pub fn invalidate_roster(&self, context: &RosterContext) {
        let key = self.roster_key(context);
        if let Err(err) = self.port.remove(&key) {
            tracing::warn!(key = %key, error = %err, "cache remove failed");
        }
    }

    fn read<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.port.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "cache read failed, treating as miss");
                return None;
            }
        };
        match postcard::from_bytes::<Versioned<T>>(&bytes) {
            Ok(v) if v.version == SNAPSHOT_VERSION => Some(v.payload),
            Ok(v) => {
                tracing::debug!(key = %key, version = v.version, "discarding snapshot from other version");
                None
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "undecodable cache snapshot, treating as miss");
                None
            }
        }
    }

    fn write<T: Serialize>(&self, key: &str, payload: &T) {
        let envelope = Versioned {
            version: SNAPSHOT_VERSION,
            payload,
        };
        let bytes = match postcard::to_allocvec(&envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "failed to encode cache snapshot");
                return;
            }
        };
        if let Err(err) = self.port.set(key, &bytes) {
            tracing::warn!(key = %key, error = %err, "cache write failed, continuing without cache");
        }
    }
}
