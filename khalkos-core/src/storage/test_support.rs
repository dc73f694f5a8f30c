//! In-memory platform doubles for unit tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng, Payload},
    ChaCha20Poly1305, Key, Nonce,
};

use super::{
    error::StorageError,
    traits::{AtomicBlobStore, DeviceAuthenticator, DeviceKeystore},
    types::{AuthenticationOutcome, BiometricStatus},
};

const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 under a device key that [`InMemoryKeystore::reset`] replaces,
/// the way a reinstall or a keychain wipe would.
pub struct InMemoryKeystore {
    key: Mutex<Key>,
    sealed: AtomicU64,
}

impl InMemoryKeystore {
    pub fn new() -> Self {
        Self {
            key: Mutex::new(ChaCha20Poly1305::generate_key(&mut OsRng)),
            sealed: AtomicU64::new(0),
        }
    }

    /// Forgets the device key; everything sealed so far stops opening.
    pub fn reset(&self) {
        *self.key.lock().unwrap() = ChaCha20Poly1305::generate_key(&mut OsRng);
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(&self.key.lock().unwrap())
    }
}

impl DeviceKeystore for InMemoryKeystore {
    fn seal(&self, associated_data: Vec<u8>, plaintext: Vec<u8>) -> Result<Vec<u8>, StorageError> {
        // counter nonces never repeat under one key
        let mut nonce = [0u8; NONCE_LEN];
        nonce[4..].copy_from_slice(&self.sealed.fetch_add(1, Ordering::Relaxed).to_be_bytes());

        let mut out = nonce.to_vec();
        out.extend(
            self.cipher()
                .encrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: &plaintext,
                        aad: &associated_data,
                    },
                )
                .map_err(|err| StorageError::Crypto(err.to_string()))?,
        );
        Ok(out)
    }

    fn open_sealed(
        &self,
        associated_data: Vec<u8>,
        ciphertext: Vec<u8>,
    ) -> Result<Vec<u8>, StorageError> {
        let Some((nonce, body)) = ciphertext.split_at_checked(NONCE_LEN) else {
            return Err(StorageError::Crypto("sealed value truncated".to_string()));
        };
        self.cipher()
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: body,
                    aad: &associated_data,
                },
            )
            .map_err(|err| StorageError::Crypto(err.to_string()))
    }
}

/// Blob store over a map, with per-path delete failures for best-effort paths.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    undeletable: Mutex<HashSet<String>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self, path: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(path).cloned()
    }

    pub fn insert(&self, path: &str, bytes: Vec<u8>) {
        self.blobs.lock().unwrap().insert(path.to_string(), bytes);
    }

    pub fn fail_deletes_for(&self, path: &str) {
        self.undeletable.lock().unwrap().insert(path.to_string());
    }
}

impl AtomicBlobStore for InMemoryBlobStore {
    fn read(&self, path: String) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.raw(&path))
    }

    fn write_atomic(&self, path: String, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.blobs.lock().unwrap().insert(path, bytes);
        Ok(())
    }

    fn delete(&self, path: String) -> Result<(), StorageError> {
        if self.undeletable.lock().unwrap().contains(&path) {
            return Err(StorageError::BlobStore(format!("{path} is read-only")));
        }
        self.blobs.lock().unwrap().remove(&path);
        Ok(())
    }
}

/// Authenticator answering from a queue of outcomes, `Success` once the queue is empty.
pub struct ScriptedAuthenticator {
    status: Mutex<BiometricStatus>,
    outcomes: Mutex<VecDeque<AuthenticationOutcome>>,
    prompts: AtomicUsize,
}

impl ScriptedAuthenticator {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(BiometricStatus {
                available: true,
                enrolled: true,
            }),
            outcomes: Mutex::new(VecDeque::new()),
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn set_status(&self, status: BiometricStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn push(&self, outcome: AuthenticationOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Number of prompts shown so far.
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceAuthenticator for ScriptedAuthenticator {
    async fn biometric_status(&self) -> BiometricStatus {
        *self.status.lock().unwrap()
    }

    async fn authenticate(&self, _reason: &str) -> AuthenticationOutcome {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(AuthenticationOutcome::Success)
    }
}
