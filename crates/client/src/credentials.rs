//! Operator credential lookup.
//!
//! The chat core only needs an opaque session key and the auth seed the login
//! flow derived from it; how the seed is produced is owned elsewhere.

use std::fmt;

use chatdesk_shared::stream_url;

use crate::storage::Storage;

/// Storage key holding the operator session key.
pub const SESSION_KEY_KEY: &str = "adminSessionKey";
/// Storage key holding the derived auth seed.
pub const AUTH_SEED_KEY: &str = "adminAuthSeed";

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub session_key: String,
    pub auth_seed: String,
}

impl Credential {
    /// Returns `None` when either part is blank.
    pub fn new(session_key: impl Into<String>, auth_seed: impl Into<String>) -> Option<Self> {
        let session_key = session_key.into().trim().to_string();
        let auth_seed = auth_seed.into().trim().to_string();
        if session_key.is_empty() || auth_seed.is_empty() {
            return None;
        }
        Some(Self {
            session_key,
            auth_seed,
        })
    }

    /// Stream endpoint for this credential on `host`.
    pub fn stream_url(&self, host: &str) -> Option<String> {
        stream_url(host, &self.session_key, &self.auth_seed)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("session_key", &"<redacted>")
            .field("auth_seed", &"<redacted>")
            .finish()
    }
}

/// Source of the current credential. Read on every request so a re-login is
/// picked up without rebuilding clients.
pub trait CredentialProvider: Send + Sync + 'static {
    fn credential(&self) -> Option<Credential>;
}

/// Fixed credential, e.g. from configuration.
#[derive(Debug, Clone)]
pub struct StaticCredentials(Option<Credential>);

impl StaticCredentials {
    pub fn new(credential: Option<Credential>) -> Self {
        Self(credential)
    }
}

impl CredentialProvider for StaticCredentials {
    fn credential(&self) -> Option<Credential> {
        self.0.clone()
    }
}

/// Credential persisted by the login flow.
#[derive(Debug, Clone)]
pub struct StoredCredentials {
    storage: Storage,
}

impl StoredCredentials {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn store(&self, credential: &Credential) -> Result<(), crate::storage::StorageError> {
        self.storage.save(SESSION_KEY_KEY, &credential.session_key)?;
        self.storage.save(AUTH_SEED_KEY, &credential.auth_seed)
    }

    pub fn clear(&self) {
        self.storage.remove(SESSION_KEY_KEY);
        self.storage.remove(AUTH_SEED_KEY);
    }

    fn read(&self, key: &str) -> Option<String> {
        let raw = self.storage.load_raw(key)?;
        // Values may be stored JSON-encoded or bare.
        Some(serde_json::from_str::<String>(&raw).unwrap_or(raw))
    }
}

impl CredentialProvider for StoredCredentials {
    fn credential(&self) -> Option<Credential> {
        Credential::new(self.read(SESSION_KEY_KEY)?, self.read(AUTH_SEED_KEY)?)
    }
}
