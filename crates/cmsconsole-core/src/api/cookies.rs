//! Cookie jar holding the server-managed renewal credential.
//!
//! The renewal credential is an HttpOnly cookie set by the login and renewal
//! responses. The jar can be backed by a JSON file in the cache directory so a
//! new process can still renew the access token a previous one obtained.
//! Session cookies are written too: for a console the process boundary is not
//! the end of the session.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use anyhow::{anyhow, Context, Result};
use cookie_store::CookieStore;
use reqwest_cookie_store::CookieStoreMutex;
use tracing::debug;

use crate::auth::store::write_private;

/// Cookie file name in the cache directory
pub const COOKIE_FILE: &str = "cookies.json";

/// Shared cookie jar, optionally mirrored to disk.
/// Clone is cheap - the store is reference counted.
#[derive(Clone)]
pub struct CookieJar {
    store: Arc<CookieStoreMutex>,
    path: Option<PathBuf>,
}

impl CookieJar {
    /// A jar that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(CookieStoreMutex::new(CookieStore::default())),
            path: None,
        }
    }

    /// Open the jar stored in `dir`, starting empty if there is none yet.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(COOKIE_FILE);
        let store = if path.exists() {
            let contents =
                std::fs::read(&path).with_context(|| format!("Failed to read cookie file {}", path.display()))?;
            cookie_store::serde::json::load_all(contents.as_slice())
                .map_err(|e| anyhow!("Failed to parse cookie file {}: {}", path.display(), e))?
        } else {
            CookieStore::default()
        };
        debug!(path = %path.display(), "Opened cookie jar");

        Ok(Self {
            store: Arc::new(CookieStoreMutex::new(store)),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The store handed to reqwest as its cookie provider.
    pub(crate) fn provider(&self) -> Arc<CookieStoreMutex> {
        Arc::clone(&self.store)
    }

    /// Write the jar to its file (mode 0600 on unix). No-op for in-memory jars.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut contents = Vec::new();
        {
            let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            cookie_store::serde::json::save_incl_expired_and_nonpersistent(&store, &mut contents)
                .map_err(|e| anyhow!("Failed to serialize cookies: {}", e))?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        write_private(path, &contents)
    }

    /// Drop every cookie, in memory and on disk.
    pub fn clear(&self) -> Result<()> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner).clear();
        match &self.path {
            Some(path) if path.exists() => std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove cookie file {}", path.display())),
            _ => Ok(()),
        }
    }

    /// `name=value` pairs that would be sent to `url`.
    pub fn cookies_for(&self, url: &reqwest::Url) -> Vec<(String, String)> {
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        store
            .get_request_values(url)
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cookie_store::RawCookie;
    use reqwest::Url;

    const LOGIN_URL: &str = "http://cms.test/api/auth/login";
    const REFRESH_URL: &str = "http://cms.test/api/auth/refresh";

    fn set_cookie(jar: &CookieJar, header: &str, url: &str) {
        let url = Url::parse(url).unwrap();
        let cookie = RawCookie::parse(header.to_string()).unwrap();
        jar.store.lock().unwrap().insert_raw(&cookie, &url).unwrap();
    }

    #[test]
    fn test_renewal_cookie_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let jar = CookieJar::open(dir.path()).unwrap();
        set_cookie(&jar, "refresh_token=r-123; Path=/api/auth; HttpOnly", LOGIN_URL);
        jar.save().unwrap();

        let reopened = CookieJar::open(dir.path()).unwrap();
        let refresh = Url::parse(REFRESH_URL).unwrap();
        assert_eq!(
            reopened.cookies_for(&refresh),
            vec![("refresh_token".to_string(), "r-123".to_string())]
        );
        // Path-scoped: not sent to ordinary API calls
        assert!(reopened.cookies_for(&Url::parse("http://cms.test/api/pages").unwrap()).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_cookie_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let jar = CookieJar::open(dir.path()).unwrap();
        set_cookie(&jar, "refresh_token=r-123; Path=/api/auth", LOGIN_URL);
        jar.save().unwrap();

        let mode = std::fs::metadata(dir.path().join(COOKIE_FILE)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_clear_removes_cookies_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let jar = CookieJar::open(dir.path()).unwrap();
        set_cookie(&jar, "refresh_token=r-123; Path=/api/auth", LOGIN_URL);
        jar.save().unwrap();

        jar.clear().unwrap();

        let refresh = Url::parse(REFRESH_URL).unwrap();
        assert!(jar.cookies_for(&refresh).is_empty());
        assert!(!dir.path().join(COOKIE_FILE).exists());
        assert!(CookieJar::open(dir.path()).unwrap().cookies_for(&refresh).is_empty());
        // Clearing twice is fine
        jar.clear().unwrap();
    }

    #[test]
    fn test_in_memory_jar_never_touches_disk() {
        let jar = CookieJar::in_memory();
        set_cookie(&jar, "refresh_token=r-1; Path=/", LOGIN_URL);
        assert!(jar.path().is_none());
        jar.save().unwrap();
        assert_eq!(jar.cookies_for(&Url::parse(REFRESH_URL).unwrap()).len(), 1);
    }
}
