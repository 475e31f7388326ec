#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

const VAULT_SCHEMA_VERSION: u8 = 1;
const MASTER_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const MAX_SECRET_ID_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("invalid secret id: {0}")]
    InvalidSecretId(String),
    #[error("invalid secret value")]
    InvalidSecretValue,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("decode error: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("vault cryptographic operation failed")]
    Crypto,
}

/// A stored secret. Binary secrets surface as base64 when read as a seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretValue {
    Text(String),
    Binary(Vec<u8>),
}

impl SecretValue {
    pub fn into_seed(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Binary(bytes) => BASE64.encode(bytes),
        }
    }
}

/// Resolves a custodian signing seed by opaque id.
pub trait SecretStore: Send + Sync {
    fn resolve(&self, secret_id: &str) -> Result<Option<SecretValue>, VaultError>;

    fn resolve_seed(&self, secret_id: &str) -> Result<Option<String>, VaultError> {
        Ok(self.resolve(secret_id)?.map(SecretValue::into_seed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum EntryKind {
    #[default]
    Text,
    Binary,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct VaultDocument {
    schema_version: u8,
    entries: BTreeMap<String, VaultEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VaultEntry {
    #[serde(default)]
    kind: EntryKind,
    nonce_b64: String,
    ciphertext_b64: String,
    updated_at_unix_ms: u64,
}

/// AES-256-GCM encrypted JSON vault next to a locally generated master key.
#[derive(Debug, Clone)]
pub struct SecretVault {
    vault_path: PathBuf,
    key_path: PathBuf,
}

impl SecretVault {
    /// `QUORUM_VAULT_PATH`, else `$XDG_CONFIG_HOME/quorum/vault.json`.
    pub fn default_local() -> Self {
        let vault_path = env::var("QUORUM_VAULT_PATH")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(default_vault_path);
        Self::at(vault_path)
    }

    pub fn at(vault_path: PathBuf) -> Self {
        let mut key_path = vault_path.clone();
        key_path.set_extension("master.key");
        Self::for_paths(vault_path, key_path)
    }

    pub fn for_paths(vault_path: PathBuf, key_path: PathBuf) -> Self {
        Self {
            vault_path,
            key_path,
        }
    }

    pub fn set_secret(&self, secret_id: &str, value: &SecretValue) -> Result<(), VaultError> {
        validate_secret_id(secret_id)?;
        let (kind, plaintext) = match value {
            SecretValue::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Err(VaultError::InvalidSecretValue);
                }
                (EntryKind::Text, trimmed.as_bytes().to_vec())
            }
            SecretValue::Binary(bytes) => {
                if bytes.is_empty() {
                    return Err(VaultError::InvalidSecretValue);
                }
                (EntryKind::Binary, bytes.clone())
            }
        };

        self.ensure_parent_dirs()?;
        let key = self.load_or_create_master_key()?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| VaultError::Crypto)?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|_| VaultError::Crypto)?;

        let mut doc = self.read_document()?.unwrap_or_default();
        doc.schema_version = VAULT_SCHEMA_VERSION;
        doc.entries.insert(
            secret_id.to_string(),
            VaultEntry {
                kind,
                nonce_b64: BASE64.encode(nonce_bytes),
                ciphertext_b64: BASE64.encode(ciphertext),
                updated_at_unix_ms: now_unix_ms(),
            },
        );
        self.write_document(&doc)
    }

    pub fn resolve_secret(&self, secret_id: &str) -> Result<Option<SecretValue>, VaultError> {
        validate_secret_id(secret_id)?;
        let Some(doc) = self.read_document()? else {
            return Ok(None);
        };
        let Some(entry) = doc.entries.get(secret_id) else {
            return Ok(None);
        };
        let key = self.load_or_create_master_key()?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| VaultError::Crypto)?;
        let nonce_raw = BASE64.decode(entry.nonce_b64.as_bytes())?;
        if nonce_raw.len() != NONCE_LEN {
            return Err(VaultError::Crypto);
        }
        let nonce = Nonce::from_slice(&nonce_raw);
        let ciphertext = BASE64.decode(entry.ciphertext_b64.as_bytes())?;
        let plaintext = cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| VaultError::Crypto)?;
        match entry.kind {
            EntryKind::Binary => Ok(Some(SecretValue::Binary(plaintext))),
            EntryKind::Text => {
                let secret = String::from_utf8(plaintext).map_err(|_| VaultError::Crypto)?;
                if secret.trim().is_empty() {
                    return Ok(None);
                }
                Ok(Some(SecretValue::Text(secret)))
            }
        }
    }

    pub fn has_secret(&self, secret_id: &str) -> Result<bool, VaultError> {
        Ok(self.resolve_secret(secret_id)?.is_some())
    }

    pub fn delete_secret(&self, secret_id: &str) -> Result<bool, VaultError> {
        validate_secret_id(secret_id)?;
        let Some(mut doc) = self.read_document()? else {
            return Ok(false);
        };
        let removed = doc.entries.remove(secret_id).is_some();
        if removed {
            self.write_document(&doc)?;
        }
        Ok(removed)
    }

    pub fn list_secret_ids(&self) -> Result<Vec<String>, VaultError> {
        let Some(doc) = self.read_document()? else {
            return Ok(Vec::new());
        };
        Ok(doc.entries.keys().cloned().collect())
    }

    fn ensure_parent_dirs(&self) -> Result<(), VaultError> {
        if let Some(parent) = self.vault_path.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Some(parent) = self.key_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn read_document(&self) -> Result<Option<VaultDocument>, VaultError> {
        if !self.vault_path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.vault_path)?;
        if raw.trim().is_empty() {
            return Ok(Some(VaultDocument::default()));
        }
        let doc = serde_json::from_str::<VaultDocument>(&raw)?;
        if doc.schema_version != VAULT_SCHEMA_VERSION {
            return Err(VaultError::Crypto);
        }
        Ok(Some(doc))
    }

    fn write_document(&self, doc: &VaultDocument) -> Result<(), VaultError> {
        self.ensure_parent_dirs()?;
        let serialized = serde_json::to_vec_pretty(doc)?;
        atomic_write(&self.vault_path, &serialized)
    }

    fn load_or_create_master_key(&self) -> Result<[u8; MASTER_KEY_LEN], VaultError> {
        if self.key_path.exists() {
            let encoded = fs::read_to_string(&self.key_path)?;
            let decoded = BASE64.decode(encoded.trim().as_bytes())?;
            return <[u8; MASTER_KEY_LEN]>::try_from(decoded.as_slice())
                .map_err(|_| VaultError::Crypto);
        }

        self.ensure_parent_dirs()?;
        let mut key = [0u8; MASTER_KEY_LEN];
        OsRng.fill_bytes(&mut key);
        write_new_file_restricted(&self.key_path, BASE64.encode(key).as_bytes())?;
        Ok(key)
    }
}

impl SecretStore for SecretVault {
    fn resolve(&self, secret_id: &str) -> Result<Option<SecretValue>, VaultError> {
        self.resolve_secret(secret_id)
    }
}

fn validate_secret_id(raw: &str) -> Result<(), VaultError> {
    let valid = !raw.is_empty()
        && raw.len() <= MAX_SECRET_ID_LEN
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(VaultError::InvalidSecretId(raw.to_string()))
    }
}

fn default_vault_path() -> PathBuf {
    if let Ok(xdg_config_home) = env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg_config_home).join("quorum").join("vault.json");
    }
    if let Ok(home) = env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("quorum")
            .join("vault.json");
    }
    PathBuf::from(".quorum").join("vault.json")
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(1)
        .max(1)
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), VaultError> {
    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(tmp, path)?;
    Ok(())
}

fn write_new_file_restricted(path: &Path, data: &[u8]) -> Result<(), VaultError> {
    let mut file = OpenOptions::new().create_new(true).write(true).open(path)?;
    file.write_all(data)?;
    file.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault(dir: &tempfile::TempDir) -> SecretVault {
        SecretVault::at(dir.path().join("vault.json"))
    }

    #[test]
    fn at_vault_01_text_secret_stays_out_of_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault(&dir);
        let seed = "bottom drive obey lake curtain smoke basket hold race lonely fit walk";
        vault
            .set_secret("custodian-seed", &SecretValue::Text(seed.to_string()))
            .unwrap();
        assert_eq!(
            vault.resolve_seed("custodian-seed").unwrap().as_deref(),
            Some(seed)
        );
        let raw = fs::read_to_string(dir.path().join("vault.json")).unwrap();
        assert!(!raw.contains("bottom drive"));
    }

    #[test]
    fn at_vault_02_binary_secret_resolves_as_base64() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault(&dir);
        vault
            .set_secret("raw-seed", &SecretValue::Binary(vec![0xde, 0xad, 0xbe, 0xef]))
            .unwrap();
        assert_eq!(
            vault.resolve_secret("raw-seed").unwrap(),
            Some(SecretValue::Binary(vec![0xde, 0xad, 0xbe, 0xef]))
        );
        assert_eq!(vault.resolve_seed("raw-seed").unwrap().as_deref(), Some("3q2+7w=="));
    }

    #[test]
    fn at_vault_03_has_delete_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault(&dir);
        assert!(!vault.has_secret("a").unwrap());
        vault.set_secret("b", &SecretValue::Text("x".to_string())).unwrap();
        vault.set_secret("a", &SecretValue::Text("y".to_string())).unwrap();
        assert_eq!(vault.list_secret_ids().unwrap(), vec!["a", "b"]);
        assert!(vault.delete_secret("a").unwrap());
        assert!(!vault.delete_secret("a").unwrap());
        assert!(!vault.has_secret("a").unwrap());
    }

    #[test]
    fn at_vault_04_invalid_ids_and_empty_values_fail_closed() {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault(&dir);
        assert!(matches!(
            vault.set_secret("has space", &SecretValue::Text("x".to_string())),
            Err(VaultError::InvalidSecretId(_))
        ));
        assert!(matches!(
            vault.set_secret("ok", &SecretValue::Text("   ".to_string())),
            Err(VaultError::InvalidSecretValue)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn at_vault_05_master_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let vault = vault(&dir);
        vault.set_secret("k", &SecretValue::Text("v".to_string())).unwrap();
        let mode = fs::metadata(dir.path().join("vault.master.key"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
