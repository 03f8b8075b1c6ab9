// Persistent credential stores
//
// Two implementations of `wardline_api::CredentialStore`, both keeping
// an in-memory cache authoritative: the trait contract is synchronous
// and infallible, so persistence failures are logged and the session
// keeps working from memory.
//
// Persisted key names (`authToken`, `refreshToken`, `userRole`,
// `userName`) are a compatibility contract with the web dashboard's
// storage -- do not rename them.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use wardline_api::{CredentialStore, Credentials};

/// On-disk shape of the credential file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedKeys {
    #[serde(rename = "authToken", skip_serializing_if = "Option::is_none")]
    auth_token: Option<String>,
    #[serde(rename = "refreshToken", skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(rename = "userRole", skip_serializing_if = "Option::is_none")]
    user_role: Option<String>,
    #[serde(rename = "userName", skip_serializing_if = "Option::is_none")]
    user_name: Option<String>,
}

impl From<&Credentials> for PersistedKeys {
    fn from(creds: &Credentials) -> Self {
        Self {
            auth_token: creds.access_token.clone(),
            refresh_token: creds.refresh_token.clone(),
            user_role: creds.role.clone(),
            user_name: creds.display_name.clone(),
        }
    }
}

impl From<PersistedKeys> for Credentials {
    fn from(keys: PersistedKeys) -> Self {
        Self {
            access_token: keys.auth_token,
            refresh_token: keys.refresh_token,
            role: keys.user_role,
            display_name: keys.user_name,
        }
    }
}

// ── FileCredentialStore ─────────────────────────────────────────────

/// Credential store persisting all four keys to one JSON file.
///
/// Tokens land on disk in plaintext -- fine for development machines,
/// use [`KeyringCredentialStore`] for anything shared.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    cache: RwLock<Credentials>,
}

impl FileCredentialStore {
    /// Open (or create) a store at `path`, loading any previous session.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cache = load_keys_from(&path).map_or_else(Credentials::default, Credentials::from);
        Self {
            path,
            cache: RwLock::new(cache),
        }
    }

    fn persist(&self, creds: &Credentials) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, path = %self.path.display(), "cannot create credential dir");
                return;
            }
        }
        match serde_json::to_vec_pretty(&PersistedKeys::from(creds)) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.path, bytes) {
                    warn!(error = %e, path = %self.path.display(), "credential persist failed");
                }
            }
            Err(e) => warn!(error = %e, "credential serialization failed"),
        }
    }
}

fn load_keys_from(path: &Path) -> Option<PersistedKeys> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(keys) => Some(keys),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "corrupt credential file, starting empty");
            None
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Credentials {
        self.cache.read().expect("credential lock poisoned").clone()
    }

    fn set_tokens(&self, access: &str, refresh: Option<&str>) {
        let mut cache = self.cache.write().expect("credential lock poisoned");
        cache.access_token = Some(access.to_owned());
        if let Some(refresh) = refresh {
            cache.refresh_token = Some(refresh.to_owned());
        }
        self.persist(&cache);
    }

    fn set_session(&self, role: &str, display_name: &str) {
        let mut cache = self.cache.write().expect("credential lock poisoned");
        cache.role = Some(role.to_owned());
        cache.display_name = Some(display_name.to_owned());
        self.persist(&cache);
    }

    fn clear(&self) {
        let mut cache = self.cache.write().expect("credential lock poisoned");
        *cache = Credentials::default();
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, path = %self.path.display(), "credential file removal failed");
            }
        }
        debug!("credential store cleared");
    }
}

// ── KeyringCredentialStore ──────────────────────────────────────────

/// Credential store keeping both tokens in the system keyring, with the
/// non-secret session attributes (role, display name) in a JSON sidecar
/// file.
pub struct KeyringCredentialStore {
    service: String,
    profile: String,
    session_path: PathBuf,
    cache: RwLock<Credentials>,
}

impl KeyringCredentialStore {
    /// Open a store for `profile`, reading any previous session from
    /// the keyring and the sidecar file.
    pub fn new(service: &str, profile: &str, session_path: impl Into<PathBuf>) -> Self {
        let session_path = session_path.into();
        let mut cache: Credentials = load_keys_from(&session_path)
            .map_or_else(Credentials::default, Credentials::from);

        cache.access_token = read_keyring(service, profile, "authToken");
        cache.refresh_token = read_keyring(service, profile, "refreshToken");

        Self {
            service: service.to_owned(),
            profile: profile.to_owned(),
            session_path,
            cache: RwLock::new(cache),
        }
    }

    fn write_keyring(&self, key: &str, value: &str) {
        match keyring::Entry::new(&self.service, &format!("{}/{key}", self.profile)) {
            Ok(entry) => {
                if let Err(e) = entry.set_password(value) {
                    warn!(error = %e, key, "keyring write failed");
                }
            }
            Err(e) => warn!(error = %e, key, "keyring entry unavailable"),
        }
    }

    fn delete_keyring(&self, key: &str) {
        if let Ok(entry) = keyring::Entry::new(&self.service, &format!("{}/{key}", self.profile)) {
            // A missing entry is already the state we want.
            let _ = entry.delete_credential();
        }
    }

    fn persist_session(&self, creds: &Credentials) {
        let keys = PersistedKeys {
            auth_token: None,
            refresh_token: None,
            user_role: creds.role.clone(),
            user_name: creds.display_name.clone(),
        };
        if let Some(parent) = self.session_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_vec_pretty(&keys) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.session_path, bytes) {
                    warn!(error = %e, "session sidecar persist failed");
                }
            }
            Err(e) => warn!(error = %e, "session serialization failed"),
        }
    }
}

fn read_keyring(service: &str, profile: &str, key: &str) -> Option<String> {
    keyring::Entry::new(service, &format!("{profile}/{key}"))
        .ok()?
        .get_password()
        .ok()
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self) -> Credentials {
        self.cache.read().expect("credential lock poisoned").clone()
    }

    fn set_tokens(&self, access: &str, refresh: Option<&str>) {
        let mut cache = self.cache.write().expect("credential lock poisoned");
        cache.access_token = Some(access.to_owned());
        self.write_keyring("authToken", access);
        if let Some(refresh) = refresh {
            cache.refresh_token = Some(refresh.to_owned());
            self.write_keyring("refreshToken", refresh);
        }
    }

    fn set_session(&self, role: &str, display_name: &str) {
        let mut cache = self.cache.write().expect("credential lock poisoned");
        cache.role = Some(role.to_owned());
        cache.display_name = Some(display_name.to_owned());
        self.persist_session(&cache);
    }

    fn clear(&self) {
        let mut cache = self.cache.write().expect("credential lock poisoned");
        *cache = Credentials::default();
        self.delete_keyring("authToken");
        self.delete_keyring("refreshToken");
        if let Err(e) = std::fs::remove_file(&self.session_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "session sidecar removal failed");
            }
        }
        debug!("credential store cleared");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn file_store_round_trips_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        {
            let store = FileCredentialStore::new(&path);
            store.set_tokens("access-1", Some("refresh-1"));
            store.set_session("doctor", "Dr. Patel");
        }

        // A new instance over the same path sees the previous session.
        let reopened = FileCredentialStore::new(&path);
        let creds = reopened.get();
        assert_eq!(creds.access_token.as_deref(), Some("access-1"));
        assert_eq!(creds.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(creds.role.as_deref(), Some("doctor"));
        assert_eq!(creds.display_name.as_deref(), Some("Dr. Patel"));
    }

    #[test]
    fn file_store_uses_dashboard_key_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::new(&path);
        store.set_tokens("access-1", Some("refresh-1"));
        store.set_session("nurse", "J. Rivera");

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["authToken"], "access-1");
        assert_eq!(raw["refreshToken"], "refresh-1");
        assert_eq!(raw["userRole"], "nurse");
        assert_eq!(raw["userName"], "J. Rivera");
    }

    #[test]
    fn clear_removes_the_file_and_all_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::new(&path);
        store.set_tokens("access-1", Some("refresh-1"));
        assert!(path.exists());

        store.clear();

        assert!(store.get().is_empty());
        assert!(!path.exists());

        // Clearing an already-clear store is a no-op, not an error.
        store.clear();
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{{{{not json").unwrap();

        let store = FileCredentialStore::new(&path);
        assert!(store.get().is_empty());
    }
}
