use crate::domain::models::RefreshCredential;
use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait CredentialStore: Send + Sync {
    fn save_credential(&self, credential: &RefreshCredential) -> Result<(), InfraError>;
    fn load_credential(&self) -> Result<Option<RefreshCredential>, InfraError>;
    fn delete_credential(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
    account_name: String,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new("taskdesk.session", "default")
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save_credential(&self, credential: &RefreshCredential) -> Result<(), InfraError> {
        let payload = serde_json::to_string(credential)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_credential(&self) -> Result<Option<RefreshCredential>, InfraError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };

        let credential = serde_json::from_str::<RefreshCredential>(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        Ok(Some(credential))
    }

    fn delete_credential(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

/// JSON file under the workspace state directory.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    write_guard: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, InfraError> {
        self.write_guard
            .lock()
            .map_err(|error| InfraError::Credential(format!("credential file lock poisoned: {error}")))
    }
}

impl CredentialStore for FileCredentialStore {
    fn save_credential(&self, credential: &RefreshCredential) -> Result<(), InfraError> {
        let _guard = self.lock()?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let formatted = serde_json::to_string_pretty(credential)?;
        fs::write(&self.path, format!("{formatted}\n"))?;
        restrict_permissions(&self.path)?;
        Ok(())
    }

    fn load_credential(&self) -> Result<Option<RefreshCredential>, InfraError> {
        let _guard = self.lock()?;
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(InfraError::Io(error)),
        };
        let credential = serde_json::from_str::<RefreshCredential>(&raw).map_err(|error| {
            InfraError::Credential(format!("invalid credential file {}: {error}", self.path.display()))
        })?;
        Ok(Some(credential))
    }

    fn delete_credential(&self) -> Result<(), InfraError> {
        let _guard = self.lock()?;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(InfraError::Io(error)),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), InfraError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), InfraError> {
    Ok(())
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    credential: Mutex<Option<RefreshCredential>>,
}

impl InMemoryCredentialStore {
    pub fn with_credential(credential: RefreshCredential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn save_credential(&self, credential: &RefreshCredential) -> Result<(), InfraError> {
        let mut guard = self
            .credential
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = Some(credential.clone());
        Ok(())
    }

    fn load_credential(&self) -> Result<Option<RefreshCredential>, InfraError> {
        let guard = self
            .credential
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    fn delete_credential(&self) -> Result<(), InfraError> {
        let mut guard = self
            .credential
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}
