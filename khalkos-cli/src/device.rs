//! Development stand-ins for the platform storage primitives.
//!
//! The keystore key lives in a plain file next to the data, so this is only suitable
//! for testnets and local development.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use khalkos_core::storage::{
    AtomicBlobStore, AuthenticationOutcome, BiometricStatus, DeviceAuthenticator,
    DeviceKeystore, StorageError,
};
use rand::{rngs::OsRng, RngCore};

const NONCE_LEN: usize = 24;
const KEY_FILE: &str = "device.key";

/// Blob store writing one file per slot, replaced atomically through a rename.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> eyre::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, name: &str) -> Result<PathBuf, StorageError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(StorageError::BlobStore(format!("invalid slot name {name}")));
        }
        Ok(self.root.join(name))
    }
}

fn blob_error(action: &str, path: &Path, err: &io::Error) -> StorageError {
    StorageError::BlobStore(format!("{action} {}: {err}", path.display()))
}

impl AtomicBlobStore for FileBlobStore {
    fn read(&self, path: String) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path(&path)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(blob_error("read", &path, &err)),
        }
    }

    fn write_atomic(&self, path: String, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = self.path(&path)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes).map_err(|err| blob_error("write", &tmp, &err))?;
        fs::rename(&tmp, &path).map_err(|err| blob_error("rename", &path, &err))
    }

    fn delete(&self, path: String) -> Result<(), StorageError> {
        let path = self.path(&path)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(blob_error("delete", &path, &err)),
        }
    }
}

/// XChaCha20-Poly1305 keystore with its key in `<data dir>/device.key`.
pub struct DevKeystore {
    key: [u8; 32],
}

impl DevKeystore {
    /// Loads the device key, generating it on first use.
    pub fn open(root: &Path) -> eyre::Result<Self> {
        let path = root.join(KEY_FILE);
        let key = match fs::read_to_string(&path) {
            Ok(encoded) => {
                let bytes = hex::decode(encoded.trim())?;
                <[u8; 32]>::try_from(bytes.as_slice())
                    .map_err(|_| eyre::eyre!("{} does not hold a 32 byte key", path.display()))?
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let mut key = [0u8; 32];
                OsRng.fill_bytes(&mut key);
                fs::create_dir_all(root)?;
                write_private(&path, hex::encode(key).as_bytes())?;
                tracing::info!(path = %path.display(), "generated development device key");
                key
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self { key })
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.key))
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    fs::write(path, contents)
}

impl DeviceKeystore for DevKeystore {
    fn seal(&self, associated_data: Vec<u8>, plaintext: Vec<u8>) -> Result<Vec<u8>, StorageError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher()
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &associated_data,
                },
            )
            .map_err(|err| StorageError::Crypto(err.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open_sealed(
        &self,
        associated_data: Vec<u8>,
        ciphertext: Vec<u8>,
    ) -> Result<Vec<u8>, StorageError> {
        if ciphertext.len() < NONCE_LEN {
            return Err(StorageError::Crypto("sealed value truncated".to_string()));
        }
        let (nonce, payload) = ciphertext.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: payload,
                    aad: &associated_data,
                },
            )
            .map_err(|err| StorageError::Crypto(err.to_string()))
    }
}

/// Confirms device authentication prompts on the terminal.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleAuthenticator {
    auto_approve: bool,
}

impl ConsoleAuthenticator {
    pub const fn new(auto_approve: bool) -> Self {
        Self { auto_approve }
    }
}

#[async_trait]
impl DeviceAuthenticator for ConsoleAuthenticator {
    async fn biometric_status(&self) -> BiometricStatus {
        BiometricStatus {
            available: false,
            enrolled: false,
        }
    }

    async fn authenticate(&self, reason: &str) -> AuthenticationOutcome {
        if self.auto_approve {
            return AuthenticationOutcome::Success;
        }
        let prompt = format!("{reason} [y/N]: ");
        let answer = tokio::task::spawn_blocking(move || -> io::Result<String> {
            let mut stderr = io::stderr();
            stderr.write_all(prompt.as_bytes())?;
            stderr.flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await;

        match answer {
            Ok(Ok(line)) if matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes") => {
                AuthenticationOutcome::Success
            }
            Ok(Ok(_)) => AuthenticationOutcome::Cancelled,
            Ok(Err(err)) => AuthenticationOutcome::Failed {
                reason: err.to_string(),
            },
            Err(err) => AuthenticationOutcome::Failed {
                reason: err.to_string(),
            },
        }
    }
}
