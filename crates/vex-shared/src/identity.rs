use std::fs;
use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use tracing::info;

use crate::constants::{KDF_CONTEXT_FINGERPRINT, SECRET_KEY_SIZE, SIGNATURE_SIZE};
use crate::error::IdentityError;

const KEY_DIR: &str = "keys";
const PRIVATE_KEY_FILE: &str = "key.priv";
const PUBLIC_KEY_FILE: &str = "key.pub";

/// The client's Ed25519 signing identity.
///
/// Servers know a client by its public key; the same identity signs the
/// registration token and every authentication challenge.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self { signing_key }
    }

    /// Load the keypair stored under `data_dir/keys`, generating and writing a
    /// fresh one on first run.
    pub fn load_or_generate(data_dir: &Path) -> Result<Self, IdentityError> {
        let key_dir = data_dir.join(KEY_DIR);
        let priv_path = key_dir.join(PRIVATE_KEY_FILE);

        if !priv_path.exists() {
            fs::create_dir_all(&key_dir)?;
            let identity = Self::generate();
            write_private(&priv_path, hex::encode(identity.secret_bytes()).as_bytes())?;
            fs::write(key_dir.join(PUBLIC_KEY_FILE), identity.public_key_hex())?;
            info!(path = %priv_path.display(), "generated new signing keypair");
            return Ok(identity);
        }

        let contents = fs::read_to_string(&priv_path)?;
        let bytes = hex::decode(contents.trim())?;
        // 64-byte files hold seed || public key
        let seed = match bytes.len() {
            32 | 64 => &bytes[..SECRET_KEY_SIZE],
            n => {
                return Err(IdentityError::KeyFile(format!(
                    "{} holds {n} bytes, expected 32 or 64",
                    priv_path.display()
                )))
            }
        };
        let mut secret = [0u8; SECRET_KEY_SIZE];
        secret.copy_from_slice(seed);
        Ok(Self::from_secret_bytes(&secret))
    }

    /// Get the raw public key bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Public key as lowercase hex, the form it travels on the wire
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Get the raw secret key bytes
    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Sign a message and hex-encode the detached signature
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.sign(message).to_bytes())
    }
}

/// Verify a signature against a public key
pub fn verify_signature(
    pubkey_bytes: &[u8; 32],
    message: &[u8],
    signature: &Signature,
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(pubkey_bytes).map_err(|_| IdentityError::InvalidKeyBytes)?;
    verifying_key
        .verify(message, signature)
        .map_err(|_| IdentityError::InvalidSignature)
}

/// Verify a hex-encoded signature, as carried by challenge replies.
pub fn verify_hex_signature(
    pubkey_bytes: &[u8; 32],
    message: &[u8],
    signature_hex: &str,
) -> Result<(), IdentityError> {
    let bytes = hex::decode(signature_hex)?;
    let bytes: [u8; SIGNATURE_SIZE] = bytes
        .try_into()
        .map_err(|_| IdentityError::InvalidSignature)?;
    verify_signature(pubkey_bytes, message, &Signature::from_bytes(&bytes))
}

/// Decode a hex public key into its 32 raw bytes.
pub fn decode_public_key(hex_key: &str) -> Result<[u8; 32], IdentityError> {
    let bytes = hex::decode(hex_key.trim())?;
    bytes.try_into().map_err(|_| IdentityError::InvalidKeyBytes)
}

/// Short, stable fingerprint of a public key for display to the operator.
pub fn fingerprint(pubkey_bytes: &[u8; 32]) -> String {
    let hash = blake3::derive_key(KDF_CONTEXT_FINGERPRINT, pubkey_bytes);
    hex::encode(&hash[..8])
}

/// Write a file only the owner can read.
#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    fs::write(path, contents)
}
