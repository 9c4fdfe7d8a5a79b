//! Credential Store Adapters
//!
//! In-memory and file-backed implementations of [`CredentialStore`].
//!
//! The file store keeps the access and refresh tokens as two distinctly
//! keyed values in one JSON document so a signed-in session survives a
//! restart.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::application::ports::CredentialStore;
use crate::domain::credentials::{CredentialPair, Token};

// =============================================================================
// In-Memory Store
// =============================================================================

/// Process-local credential store.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    pair: RwLock<Option<CredentialPair>>,
}

impl InMemoryCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding a pair.
    #[must_use]
    pub const fn with_pair(pair: CredentialPair) -> Self {
        Self {
            pair: RwLock::new(Some(pair)),
        }
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn get(&self) -> Option<CredentialPair> {
        self.pair.read().clone()
    }

    fn set(&self, pair: CredentialPair) {
        *self.pair.write() = Some(pair);
    }

    fn clear(&self) {
        *self.pair.write() = None;
    }

    fn replace_if(&self, expected: &Token, pair: CredentialPair) -> bool {
        let mut current = self.pair.write();
        if !holds_access(current.as_ref(), expected) {
            return false;
        }
        *current = Some(pair);
        true
    }
}

fn holds_access(current: Option<&CredentialPair>, expected: &Token) -> bool {
    current.is_some_and(|pair| &pair.access == expected)
}

// =============================================================================
// File-Backed Store
// =============================================================================

/// Failure reading or writing the credential file.
#[derive(Debug, thiserror::Error)]
pub enum CredentialStoreError {
    /// Filesystem operation failed.
    #[error("credential file I/O failed: {0}")]
    Io(#[from] io::Error),

    /// The file does not hold a valid credential document.
    #[error("credential file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredCredentials {
    access: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh: Option<String>,
}

/// Credential store persisted as JSON on disk.
///
/// The in-memory copy is authoritative for the running process; disk
/// failures are logged and never surface to callers.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    cache: RwLock<Option<CredentialPair>>,
}

impl FileCredentialStore {
    /// Open a store at `path`, loading any pair already saved there.
    ///
    /// A missing, unreadable or malformed file starts the store empty.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cache = match load(&path) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable credential file");
                None
            }
        };
        Self {
            path,
            cache: RwLock::new(cache),
        }
    }

    /// Location of the credential file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<CredentialPair> {
        self.cache.read().clone()
    }

    fn set(&self, pair: CredentialPair) {
        let mut cache = self.cache.write();
        if let Err(e) = save(&self.path, &pair) {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to persist credentials");
        }
        *cache = Some(pair);
    }

    fn clear(&self) {
        let mut cache = self.cache.write();
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Failed to remove credential file");
            }
        }
        *cache = None;
    }

    fn replace_if(&self, expected: &Token, pair: CredentialPair) -> bool {
        let mut cache = self.cache.write();
        if !holds_access(cache.as_ref(), expected) {
            return false;
        }
        if let Err(e) = save(&self.path, &pair) {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to persist credentials");
        }
        *cache = Some(pair);
        true
    }
}

fn load(path: &Path) -> Result<Option<CredentialPair>, CredentialStoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let stored: StoredCredentials = serde_json::from_str(&raw)?;
    if stored.access.is_empty() {
        return Ok(None);
    }

    Ok(Some(CredentialPair {
        access: Token::new(stored.access),
        refresh: stored.refresh.filter(|r| !r.is_empty()).map(Token::new),
    }))
}

/// Write to a sibling temporary file, then rename over the target.
fn save(path: &Path, pair: &CredentialPair) -> Result<(), CredentialStoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let stored = StoredCredentials {
        access: pair.access.as_str().to_string(),
        refresh: pair.refresh.as_ref().map(|t| t.as_str().to_string()),
    };
    let body = serde_json::to_vec_pretty(&stored)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
