//! Token Storage Module
//!
//! Durable storage of the session token. On Windows the record is encrypted
//! with DPAPI; elsewhere it is plain JSON readable only by the owner.
//!
//! Storage faults never reach callers of [`TokenStore`]: a failed read is
//! "no token", a failed write is logged and dropped.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

#[cfg(windows)]
use windows::Win32::Security::Cryptography::{
    CryptProtectData, CryptUnprotectData, CRYPTPROTECT_UI_FORBIDDEN,
};
#[cfg(windows)]
use windows::Win32::Security::Cryptography::CRYPT_INTEGER_BLOB;

/// Fixed key of the persisted token record
pub const TOKEN_STORAGE_KEY: &str = "pm_token";

/// Infallible token persistence used by the session controller
pub trait TokenStore: Send + Sync {
    /// Read the stored token, `None` when absent or unreadable
    fn get_token(&self) -> Option<String>;

    /// Persist `token`, or delete the record when `None`
    fn set_token(&self, token: Option<&str>);

    /// When the stored token was written, if the store tracks it
    fn saved_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// On-disk shape of the token record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: String,
    pub saved_at: DateTime<Utc>,
}

/// File-backed token storage
pub struct SecureStorage {
    storage_path: PathBuf,
}

impl SecureStorage {
    /// Create storage rooted at `storage_path`
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        let storage_path = storage_path.into();

        if let Err(e) = std::fs::create_dir_all(&storage_path) {
            error!("Failed to create storage directory: {}", e);
        }

        debug!("Token storage initialized at: {:?}", storage_path);

        Self { storage_path }
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Load the full token record, including when it was saved
    pub fn load_record(&self) -> Result<Option<TokenRecord>, StorageError> {
        let file_path = self.record_path();
        if !file_path.exists() {
            return Ok(None);
        }

        let encrypted =
            std::fs::read(&file_path).map_err(|e| StorageError::Io(e.to_string()))?;

        let decrypted = self.decrypt(&encrypted)?;

        let json = String::from_utf8(decrypted)
            .map_err(|e| StorageError::Decryption(e.to_string()))?;

        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Save a token record
    pub fn save_record(&self, record: &TokenRecord) -> Result<(), StorageError> {
        let json = serde_json::to_string(record)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let encrypted = self.encrypt(json.as_bytes())?;

        let file_path = self.record_path();
        std::fs::write(&file_path, encrypted).map_err(|e| StorageError::Io(e.to_string()))?;
        restrict_permissions(&file_path)?;

        info!("Saved token record");
        Ok(())
    }

    /// Delete the token record
    pub fn delete_record(&self) -> Result<(), StorageError> {
        let file_path = self.record_path();

        if file_path.exists() {
            std::fs::remove_file(&file_path).map_err(|e| StorageError::Io(e.to_string()))?;
            info!("Deleted token record");
        }

        Ok(())
    }

    fn record_path(&self) -> PathBuf {
        self.storage_path.join(format!("{}.dat", TOKEN_STORAGE_KEY))
    }

    #[cfg(windows)]
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        use std::ptr::null_mut;

        let input = CRYPT_INTEGER_BLOB {
            cbData: data.len() as u32,
            pbData: data.as_ptr() as *mut u8,
        };

        let mut output = CRYPT_INTEGER_BLOB {
            cbData: 0,
            pbData: null_mut(),
        };

        unsafe {
            let result = CryptProtectData(
                &input,
                None,
                None,
                None,
                None,
                CRYPTPROTECT_UI_FORBIDDEN,
                &mut output,
            );

            if result.is_err() {
                return Err(StorageError::Encryption("DPAPI encryption failed".into()));
            }

            let encrypted =
                std::slice::from_raw_parts(output.pbData, output.cbData as usize).to_vec();

            // Output buffer is owned by the OS allocator
            windows::Win32::Foundation::LocalFree(windows::Win32::Foundation::HLOCAL(
                output.pbData as *mut std::ffi::c_void,
            ));

            Ok(encrypted)
        }
    }

    #[cfg(windows)]
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        use std::ptr::null_mut;

        let input = CRYPT_INTEGER_BLOB {
            cbData: data.len() as u32,
            pbData: data.as_ptr() as *mut u8,
        };

        let mut output = CRYPT_INTEGER_BLOB {
            cbData: 0,
            pbData: null_mut(),
        };

        unsafe {
            let result = CryptUnprotectData(
                &input,
                None,
                None,
                None,
                None,
                CRYPTPROTECT_UI_FORBIDDEN,
                &mut output,
            );

            if result.is_err() {
                return Err(StorageError::Decryption("DPAPI decryption failed".into()));
            }

            let decrypted =
                std::slice::from_raw_parts(output.pbData, output.cbData as usize).to_vec();

            windows::Win32::Foundation::LocalFree(windows::Win32::Foundation::HLOCAL(
                output.pbData as *mut std::ffi::c_void,
            ));

            Ok(decrypted)
        }
    }

    #[cfg(not(windows))]
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        Ok(data.to_vec())
    }

    #[cfg(not(windows))]
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        Ok(data.to_vec())
    }
}

impl TokenStore for SecureStorage {
    fn get_token(&self) -> Option<String> {
        match self.load_record() {
            Ok(record) => record.map(|r| r.token),
            Err(e) => {
                warn!("Stored token unreadable, treating as absent: {}", e);
                None
            }
        }
    }

    fn set_token(&self, token: Option<&str>) {
        let result = match token {
            Some(token) if !token.is_empty() => self.save_record(&TokenRecord {
                token: token.to_string(),
                saved_at: Utc::now(),
            }),
            _ => self.delete_record(),
        };

        if let Err(e) = result {
            warn!("Token storage write failed, session will not persist: {}", e);
        }
    }

    fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.load_record().ok().flatten().map(|r| r.saved_at)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| StorageError::Io(e.to_string()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}

/// Process-local token storage, lost on exit
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get_token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|t| t.clone())
    }

    fn set_token(&self, token: Option<&str>) {
        if let Ok(mut slot) = self.token.lock() {
            *slot = token.filter(|t| !t.is_empty()).map(str::to_string);
        }
    }
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),
}
