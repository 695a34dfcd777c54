//! Durable mirror of the access token.
//!
//! The in-memory token held by `SessionClient` is authoritative; a
//! `TokenStore` keeps a copy under one fixed key so a restarted process can
//! pick the session back up while the server-side renewal credential is still
//! valid.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed key the access token mirror is stored under.
pub const TOKEN_KEY: &str = "access_token";

pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, token: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;

    /// When the stored token was written, if the backend records it.
    fn saved_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Keeps the mirror in process memory only.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<StoredToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(StoredToken::new(token.into()))),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<String>> {
        let guard = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.as_ref().map(|t| t.token.clone()))
    }

    fn save(&self, token: &str) -> Result<()> {
        let mut guard = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(StoredToken::new(token.to_string()));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut guard = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
        Ok(())
    }

    fn saved_at(&self) -> Option<DateTime<Utc>> {
        let guard = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(|t| t.saved_at)
    }
}

// ============================================================================
// File store
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    pub saved_at: DateTime<Utc>,
}

impl StoredToken {
    pub fn new(token: String) -> Self {
        Self {
            token,
            saved_at: Utc::now(),
        }
    }
}

/// Writes the mirror to `<dir>/access_token.json` (mode 0600 on unix).
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", TOKEN_KEY))
    }

    fn read(&self) -> Result<Option<StoredToken>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read token file {}", path.display()))?;
        let stored: StoredToken = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse token file {}", path.display()))?;
        Ok(Some(stored))
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.read()?.map(|stored| stored.token))
    }

    fn save(&self, token: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create directory {}", self.dir.display()))?;
        let contents = serde_json::to_string_pretty(&StoredToken::new(token.to_string()))
            .context("Failed to serialize token")?;
        write_private(&self.path(), contents.as_bytes())
    }

    fn clear(&self) -> Result<()> {
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove token file {}", path.display()))?;
        }
        Ok(())
    }

    fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.read().ok().flatten().map(|stored| stored.saved_at)
    }
}

#[cfg(unix)]
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("Failed to open {} for writing", path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("Failed to write to {}", path.display()))
}

#[cfg(not(unix))]
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("Failed to write to {}", path.display()))
}

/// Human-friendly age of a saved token ("just now", "5m ago", "2h ago", "3d ago").
pub fn age_display(saved_at: DateTime<Utc>) -> String {
    let minutes = (Utc::now() - saved_at).num_minutes();
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        format!("{}h ago", minutes / 60)
    } else {
        format!("{}d ago", minutes / 1440)
    }
}
