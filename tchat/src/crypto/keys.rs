//! Identity keypair lifecycle for `tchat`.
//!
//! Each installation owns one RSA-2048 keypair, created on first run and
//! persisted as `private_key.pem` (PKCS#8) and `public_key.pem` (SPKI) in
//! the data directory. [`initialize_keys`] is the single entry point used at
//! startup; it loads the pair if both files exist and otherwise generates
//! and persists a fresh one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::CryptoError;
use super::pem::strip_pem;

/// RSA modulus size for new keypairs.
pub const KEY_BITS: usize = 2048;

/// File name of the PKCS#8 private key inside the data directory.
pub const PRIVATE_KEY_FILE: &str = "private_key.pem";

/// File name of the SPKI public key inside the data directory.
pub const PUBLIC_KEY_FILE: &str = "public_key.pem";

/// The user's long-term RSA keypair.
///
/// Immutable after construction and safe to share across tasks behind an
/// `Arc`. The PEM texts are kept exactly as generated or read from disk.
pub struct Keypair {
    private_key: RsaPrivateKey,
    private_pem: Zeroizing<String>,
    public_pem: String,
}

impl Keypair {
    /// Generate a new random keypair using the system's CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyGeneration`] if generation or PEM encoding
    /// fails.
    pub fn generate() -> Result<Self, CryptoError> {
        let private_key = RsaPrivateKey::new(&mut rand_core::OsRng, KEY_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self {
            private_key,
            private_pem,
            public_pem,
        })
    }

    /// Rebuild a keypair from its two PEM texts.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if either text does not parse or
    /// the public key is not the public half of the private key.
    pub fn from_pem(private_pem: &str, public_pem: &str) -> Result<Self, CryptoError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_pem)
            .map_err(|e| CryptoError::InvalidKey(format!("private key: {e}")))?;
        let public_key = RsaPublicKey::from_public_key_pem(public_pem)
            .map_err(|e| CryptoError::InvalidKey(format!("public key: {e}")))?;
        if private_key.to_public_key() != public_key {
            return Err(CryptoError::InvalidKey(
                "public key does not belong to the private key".to_string(),
            ));
        }
        Ok(Self {
            private_key,
            private_pem: Zeroizing::new(private_pem.to_string()),
            public_pem: public_pem.to_string(),
        })
    }

    /// The public key as canonical SPKI PEM.
    #[must_use]
    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }

    /// The public key with PEM armor and whitespace removed, as uploaded to
    /// the server.
    #[must_use]
    pub fn stripped_public_key(&self) -> String {
        strip_pem(&self.public_pem)
    }

    /// The private key as PKCS#8 PEM.
    #[must_use]
    pub fn private_pem(&self) -> &str {
        &self.private_pem
    }

    /// The parsed private key, for opening envelopes.
    #[must_use]
    pub const fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// Short display fingerprint: hex of the first 8 bytes of the SHA-256 of
    /// the public key's DER encoding.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        use std::fmt::Write;
        let der = self
            .private_key
            .to_public_key()
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .unwrap_or_default();
        Sha256::digest(&der)[..8]
            .iter()
            .fold(String::new(), |mut output, b| {
                let _ = write!(output, "{b:02x}");
                output
            })
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Trait for persistent keypair storage.
pub trait KeyStore: Send + Sync {
    /// Load the stored keypair.
    ///
    /// Returns `None` if either half is missing.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if the stored key data is unreadable or
    /// inconsistent.
    fn load(&self) -> Result<Option<Keypair>, CryptoError>;

    /// Persist both halves of the keypair.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Persistence`] if either file cannot be written.
    fn save(&self, keypair: &Keypair) -> Result<(), CryptoError>;
}

/// Keypair storage as two PEM files in a directory.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    /// Store keys under `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the private key file.
    #[must_use]
    pub fn private_key_path(&self) -> PathBuf {
        self.dir.join(PRIVATE_KEY_FILE)
    }

    /// Path of the public key file.
    #[must_use]
    pub fn public_key_path(&self) -> PathBuf {
        self.dir.join(PUBLIC_KEY_FILE)
    }
}

fn read_key_file(path: &Path) -> Result<String, CryptoError> {
    std::fs::read_to_string(path).map_err(|source| CryptoError::Persistence {
        path: path.to_path_buf(),
        source,
    })
}

fn write_key_file(path: &Path, contents: &str, private: bool) -> Result<(), CryptoError> {
    let map_err = |source| CryptoError::Persistence {
        path: path.to_path_buf(),
        source,
    };
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    if private {
        owner_only(&mut options);
    }
    let mut file = options.open(path).map_err(map_err)?;
    std::io::Write::write_all(&mut file, contents.as_bytes()).map_err(map_err)
}

#[cfg(unix)]
fn owner_only(options: &mut std::fs::OpenOptions) {
    use std::os::unix::fs::OpenOptionsExt;
    options.mode(0o600);
}

#[cfg(not(unix))]
fn owner_only(_options: &mut std::fs::OpenOptions) {}

impl KeyStore for FileKeyStore {
    fn load(&self) -> Result<Option<Keypair>, CryptoError> {
        let private_path = self.private_key_path();
        let public_path = self.public_key_path();
        if !private_path.exists() || !public_path.exists() {
            return Ok(None);
        }
        let private_pem = Zeroizing::new(read_key_file(&private_path)?);
        let public_pem = read_key_file(&public_path)?;
        Keypair::from_pem(&private_pem, &public_pem).map(Some)
    }

    fn save(&self, keypair: &Keypair) -> Result<(), CryptoError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| CryptoError::Persistence {
            path: self.dir.clone(),
            source,
        })?;
        write_key_file(&self.public_key_path(), keypair.public_pem(), false)?;
        write_key_file(&self.private_key_path(), keypair.private_pem(), true)
    }
}

/// In-memory key store for testing.
///
/// Does not persist keys beyond the lifetime of the struct.
pub struct InMemoryKeyStore {
    pems: parking_lot::Mutex<Option<(Zeroizing<String>, String)>>,
}

impl InMemoryKeyStore {
    /// Create a new empty in-memory key store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pems: parking_lot::Mutex::new(None),
        }
    }
}

impl Default for InMemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for InMemoryKeyStore {
    fn load(&self) -> Result<Option<Keypair>, CryptoError> {
        let guard = self.pems.lock();
        match &*guard {
            Some((private_pem, public_pem)) => Ok(Some(Keypair::from_pem(private_pem, public_pem)?)),
            None => Ok(None),
        }
    }

    fn save(&self, keypair: &Keypair) -> Result<(), CryptoError> {
        *self.pems.lock() = Some((
            Zeroizing::new(keypair.private_pem().to_string()),
            keypair.public_pem().to_string(),
        ));
        Ok(())
    }
}

/// Load the keypair from `store`, generating and persisting a new one if
/// none is stored.
///
/// Idempotent: once a pair is stored, every call returns it unchanged.
///
/// # Errors
///
/// Any error here is fatal at startup: unreadable or unwritable key files,
/// an inconsistent stored pair, or a generation failure.
pub fn initialize_keys(store: &dyn KeyStore) -> Result<Keypair, CryptoError> {
    if let Some(keypair) = store.load()? {
        tracing::debug!(fingerprint = %keypair.fingerprint(), "loaded identity keypair");
        return Ok(keypair);
    }
    let keypair = Keypair::generate()?;
    store.save(&keypair)?;
    tracing::info!(fingerprint = %keypair.fingerprint(), "generated new identity keypair");
    Ok(keypair)
}

/// Cache of counterpart public keys, keyed by user id.
///
/// Keys are stored in whatever textual form the server returned; the
/// envelope engine accepts both stripped and PEM forms.
pub struct PeerKeyCache {
    cache: parking_lot::Mutex<HashMap<String, String>>,
}

impl PeerKeyCache {
    /// Create a new empty peer key cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Store a contact's public key, replacing any previous value.
    pub fn store(&self, user_id: String, public_key: String) {
        self.cache.lock().insert(user_id, public_key);
    }

    /// Get a contact's cached public key.
    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<String> {
        self.cache.lock().get(user_id).cloned()
    }
}

impl Default for PeerKeyCache {
    fn default() -> Self {
        Self::new()
    }
}
