//! Private key persistence for registered components.
//!
//! Keys are PKCS#8 PEM strings keyed by component identity. Three backends:
//! - [`FileKeyStore`]: `<rembus_dir>/keys/<cid>.rsa.pem`
//! - [`KeyringKeyStore`]: the OS keychain via the `keyring` crate
//! - [`MemoryKeyStore`]: process memory, for tests and ephemeral tools
//!
//! Deleting a key that does not exist succeeds.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use protocol::{RembusError, Result};

use crate::config::{ClientConfig, KeyStoreKind};

/// Default keychain service name.
pub const KEYRING_SERVICE: &str = "rembus";

/// Storage for component private keys.
pub trait KeyStore: Send + Sync {
    /// Stores `pem` as the private key of `cid`, replacing any previous key.
    fn save(&self, cid: &str, pem: &str) -> Result<()>;

    /// Returns the private key of `cid`, if one is stored.
    fn load(&self, cid: &str) -> Result<Option<String>>;

    /// Removes the private key of `cid`.
    fn delete(&self, cid: &str) -> Result<()>;
}

/// Builds the key store selected by `config`.
pub fn from_config(config: &ClientConfig) -> Arc<dyn KeyStore> {
    match config.keystore {
        KeyStoreKind::File => Arc::new(FileKeyStore::new(&config.rembus_dir)),
        KeyStoreKind::Keyring => Arc::new(KeyringKeyStore::new()),
        KeyStoreKind::Memory => Arc::new(MemoryKeyStore::new()),
    }
}

fn check_cid(cid: &str) -> Result<()> {
    if cid.is_empty() || cid == "." || cid == ".." || cid.contains(['/', '\\']) {
        return Err(RembusError::Validation(format!(
            "'{}' is not a valid component identity for key storage",
            cid
        )));
    }
    Ok(())
}

/// PEM files under a `keys` directory.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    /// Creates a store rooted at `<rembus_dir>/keys`.
    pub fn new(rembus_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: rembus_dir.as_ref().join("keys"),
        }
    }

    /// Directory holding the key files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the key file for `cid`.
    pub fn key_path(&self, cid: &str) -> PathBuf {
        self.dir.join(format!("{}.rsa.pem", cid))
    }
}

impl KeyStore for FileKeyStore {
    fn save(&self, cid: &str, pem: &str) -> Result<()> {
        check_cid(cid)?;
        fs::create_dir_all(&self.dir).map_err(|e| key_file_error(&self.dir, e))?;

        let path = self.key_path(cid);
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path).map_err(|e| key_file_error(&path, e))?;
        file
            .write_all(pem.as_bytes())
            .map_err(|e| key_file_error(&path, e))?;

        tracing::debug!(cid, path = %path.display(), "private key saved");
        Ok(())
    }

    fn load(&self, cid: &str) -> Result<Option<String>> {
        check_cid(cid)?;
        let path = self.key_path(cid);
        match fs::read_to_string(&path) {
            Ok(pem) => Ok(Some(pem)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(key_file_error(&path, e)),
        }
    }

    fn delete(&self, cid: &str) -> Result<()> {
        check_cid(cid)?;
        let path = self.key_path(cid);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(cid, "private key deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(key_file_error(&path, e)),
        }
    }
}

fn key_file_error(path: &Path, err: std::io::Error) -> RembusError {
    RembusError::KeyStore(format!("{}: {}", path.display(), err))
}

/// The OS keychain (macOS Keychain, Windows Credential Manager, Secret Service).
#[derive(Debug, Clone)]
pub struct KeyringKeyStore {
    service: String,
}

impl KeyringKeyStore {
    /// Uses the default `rembus` service name.
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    /// Uses a custom service name.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, cid: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, cid).map_err(keyring_error)
    }
}

impl Default for KeyringKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn keyring_error(err: keyring::Error) -> RembusError {
    match err {
        keyring::Error::NoStorageAccess(_) => {
            RembusError::KeyStore("keychain access denied".to_string())
        }
        keyring::Error::PlatformFailure(e) => {
            RembusError::KeyStore(format!("keychain platform failure: {}", e))
        }
        other => RembusError::KeyStore(other.to_string()),
    }
}

impl KeyStore for KeyringKeyStore {
    fn save(&self, cid: &str, pem: &str) -> Result<()> {
        self.entry(cid)?.set_password(pem).map_err(keyring_error)
    }

    fn load(&self, cid: &str) -> Result<Option<String>> {
        match self.entry(cid)?.get_password() {
            Ok(pem) => Ok(Some(pem)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(keyring_error(e)),
        }
    }

    fn delete(&self, cid: &str) -> Result<()> {
        match self.entry(cid)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(keyring_error(e)),
        }
    }
}

/// In-memory key store.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: DashMap<String, String>,
}

impl MemoryKeyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if no key is stored.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyStore for MemoryKeyStore {
    fn save(&self, cid: &str, pem: &str) -> Result<()> {
        self.keys.insert(cid.to_string(), pem.to_string());
        Ok(())
    }

    fn load(&self, cid: &str) -> Result<Option<String>> {
        Ok(self.keys.get(cid).map(|pem| pem.value().clone()))
    }

    fn delete(&self, cid: &str) -> Result<()> {
        self.keys.remove(cid);
        Ok(())
    }
}
