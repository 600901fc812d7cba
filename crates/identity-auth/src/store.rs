//! Credential persistence
//!
//! `CredentialStore` is the key/value capability the authenticator is handed;
//! nothing in this crate reaches for a global store. `FileStore` keeps a JSON
//! map on disk using atomic temp-file + rename writes, and a tokio Mutex
//! serializes writers. Multi-key `set_all`/`delete` are one write each, which
//! is what keeps the primary token pair from ever being half-written.
//!
//! Uses `Pin<Box<dyn Future>>` return types so the store can be shared as
//! `Arc<dyn CredentialStore>`.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Boxed future returned by `CredentialStore` methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Key/value persistence that survives process restarts.
pub trait CredentialStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;

    /// Write every entry, or none of them.
    fn set_all<'a>(&'a self, entries: &'a [(&'a str, &'a str)]) -> BoxFuture<'a, Result<()>>;

    /// Remove the given keys. Missing keys are not an error.
    fn delete<'a>(&'a self, keys: &'a [&'a str]) -> BoxFuture<'a, Result<()>>;

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.set_all(&[(key, value)]).await })
    }

    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.get(key).await?.is_some()) })
    }
}

/// JSON-file backed store, mode 0600.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, creating the file (and its directory) as
    /// an empty map when it does not exist yet.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Store(format!("reading credential file: {e}")))?;
            let entries: BTreeMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::Store(format!("parsing credential file: {e}")))?;
            debug!(path = %path.display(), keys = entries.len(), "loaded credential store");
            entries
        } else {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| Error::Store(format!("creating credential directory: {e}")))?;
            }
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let entries = BTreeMap::new();
            write_atomic(&path, &entries).await?;
            entries
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored key names, sorted. Values are not exposed.
    pub async fn keys(&self) -> Vec<String> {
        self.state.lock().await.keys().cloned().collect()
    }
}

impl CredentialStore for FileStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { Ok(self.state.lock().await.get(key).cloned()) })
    }

    fn set_all<'a>(&'a self, entries: &'a [(&'a str, &'a str)]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let mut next = state.clone();
            for (key, value) in entries {
                next.insert((*key).to_owned(), (*value).to_owned());
            }
            write_atomic(&self.path, &next).await?;
            *state = next;
            debug!(keys = ?entries.iter().map(|(k, _)| *k).collect::<Vec<_>>(), "stored credentials");
            Ok(())
        })
    }

    fn delete<'a>(&'a self, keys: &'a [&'a str]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if !keys.iter().any(|k| state.contains_key(*k)) {
                return Ok(());
            }
            let mut next = state.clone();
            for key in keys {
                next.remove(*key);
            }
            write_atomic(&self.path, &next).await?;
            *state = next;
            debug!(?keys, "deleted credentials");
            Ok(())
        })
    }
}

/// Write the map to a file atomically.
///
/// Writes a temporary file in the same directory, restricts it to 0600 and
/// renames it over the target, so a crash never leaves a torn file.
async fn write_atomic(path: &Path, data: &BTreeMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Store(format!("serializing credentials: {e}")))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Store(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Store(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Store(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

/// Process-local store, for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.state.lock().await.keys().cloned().collect()
    }
}

impl CredentialStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { Ok(self.state.lock().await.get(key).cloned()) })
    }

    fn set_all<'a>(&'a self, entries: &'a [(&'a str, &'a str)]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            for (key, value) in entries {
                state.insert((*key).to_owned(), (*value).to_owned());
            }
            Ok(())
        })
    }

    fn delete<'a>(&'a self, keys: &'a [&'a str]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            for key in keys {
                state.remove(*key);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileStore::load(path.clone()).await.unwrap();
        store
            .set_all(&[("identity_access_token", "AT1"), ("identity_refresh_token", "RT1")])
            .await
            .unwrap();

        let reloaded = FileStore::load(path).await.unwrap();
        assert_eq!(
            reloaded.get("identity_access_token").await.unwrap().as_deref(),
            Some("AT1")
        );
        assert_eq!(
            reloaded.get("identity_refresh_token").await.unwrap().as_deref(),
            Some("RT1")
        );
    }

    #[tokio::test]
    async fn cold_start_creates_directory_and_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        let store = FileStore::load(path.clone()).await.unwrap();
        assert!(store.keys().await.is_empty());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: BTreeMap<String, String> = serde_json::from_str(&contents).unwrap();
        assert!(parsed.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_all_given_keys_and_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::load(dir.path().join("credentials.json"))
            .await
            .unwrap();
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        store.set("c", "3").await.unwrap();

        store.delete(&["a", "b", "missing"]).await.unwrap();
        assert_eq!(store.keys().await, vec!["c"]);
        assert!(!store.exists("a").await.unwrap());
        assert!(store.exists("c").await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let result = FileStore::load(path).await;
        assert!(matches!(result, Err(Error::Store(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileStore::load(path.clone()).await.unwrap();
        store.set("identity_access_token", "AT1").await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_writes_dont_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = std::sync::Arc::new(FileStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("key-{i}");
                store.set(&key, "value").await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: BTreeMap<String, String> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 10);
    }

    #[tokio::test]
    async fn memory_store_set_get_delete() {
        let store = MemoryStore::new();
        assert!(store.get("shop").await.unwrap().is_none());
        store.set("shop", "demo.myshopify.com").await.unwrap();
        assert!(store.exists("shop").await.unwrap());
        store.delete(&["shop"]).await.unwrap();
        assert!(store.keys().await.is_empty());
    }
}
