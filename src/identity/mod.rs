// Identity - Ed25519 keypair bound to a proof-of-work nonce
// Principle: The wire identity is the DER-SPKI of the public key; the nonce
// proves CPU was spent creating it

pub mod pow;

use ed25519_dalek::pkcs8::{DecodePublicKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::path::Path;
use tracing::{debug, info, warn};

/// Byte length of a DER-encoded Ed25519 SubjectPublicKeyInfo
pub const SPKI_DER_LEN: usize = 44;

/// Hex length of a peer id on the wire
pub const ID_HEX_LEN: usize = SPKI_DER_LEN * 2;

/// Identity errors
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Public key encoding failed: {0}")]
    KeyEncoding(String),

    #[error("Identity file error: {0}")]
    File(#[from] std::io::Error),

    #[error("Identity file serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Node identity, immutable for the lifetime of the process
pub struct Identity {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    /// Hex of the DER-encoded SPKI of the public key
    id: String,
    /// PoW nonce: SHA-256(id || decimal(nonce)) starts with POW_PREFIX
    nonce: u64,
}

impl Identity {
    /// Generate a fresh identity: new keypair plus a mined PoW nonce
    pub fn generate() -> Result<Self, IdentityError> {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Build an identity from an existing signing key, mining the nonce
    pub fn from_signing_key(signing_key: SigningKey) -> Result<Self, IdentityError> {
        let verifying_key = signing_key.verifying_key();
        let id = encode_id(&verifying_key)?;

        debug!("Mining PoW nonce for id {}…", &id[..16]);
        let nonce = pow::mine(&id);
        debug!("PoW nonce found: {}", nonce);

        Ok(Self {
            signing_key,
            verifying_key,
            id,
            nonce,
        })
    }

    /// Load a persisted identity, or generate and persist a fresh one.
    /// Any read or parse failure falls back to generation.
    pub fn load_or_generate(path: &Path) -> Result<Self, IdentityError> {
        match Self::load(path) {
            Some(identity) => {
                info!("Loaded identity from {}", path.display());
                Ok(identity)
            }
            None => {
                let identity = Self::generate()?;
                if let Err(e) = identity.save(path) {
                    warn!("Could not persist identity to {}: {}", path.display(), e);
                }
                Ok(identity)
            }
        }
    }

    /// Load a persisted identity; None on any read or parse failure
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        let json: serde_json::Value = serde_json::from_str(&content).ok()?;

        let secret_hex = json.get("secretKey")?.as_str()?;
        let secret_hex = secret_hex.strip_prefix("0x").unwrap_or(secret_hex);
        let secret_bytes: [u8; 32] = hex::decode(secret_hex).ok()?.try_into().ok()?;
        let signing_key = SigningKey::from_bytes(&secret_bytes);

        let verifying_key = signing_key.verifying_key();
        let id = encode_id(&verifying_key).ok()?;

        // Reuse the stored nonce when it still satisfies the puzzle
        let nonce = match json.get("nonce").and_then(|n| n.as_u64()) {
            Some(n) if pow::verify(&id, n) => n,
            _ => pow::mine(&id),
        };

        Some(Self {
            signing_key,
            verifying_key,
            id,
            nonce,
        })
    }

    /// JSON form used by the identity file and `key generate`
    pub fn export_json(&self) -> serde_json::Value {
        serde_json::json!({
            "secretKey": format!("0x{}", hex::encode(self.signing_key.to_bytes())),
            "publicKey": format!("0x{}", hex::encode(self.verifying_key.to_bytes())),
            "id": self.id,
            "nonce": self.nonce,
        })
    }

    /// Persist the identity as JSON (secret key hex, id, nonce)
    pub fn save(&self, path: &Path) -> Result<(), IdentityError> {
        std::fs::write(path, serde_json::to_string_pretty(&self.export_json())?)?;
        Ok(())
    }

    /// Peer id on the wire
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Mined PoW nonce
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Public key
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Sign the sequence-number domain string `"seq:" + decimal(seq)`,
    /// returning the signature as hex
    pub fn sign_seq(&self, seq: u64) -> String {
        let sig = self.signing_key.sign(&seq_signing_bytes(seq));
        hex::encode(sig.to_bytes())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("nonce", &self.nonce)
            .finish()
    }
}

/// The exact byte domain covered by a heartbeat signature
pub fn seq_signing_bytes(seq: u64) -> Vec<u8> {
    format!("seq:{}", seq).into_bytes()
}

/// Hex-encode the DER SPKI of a public key
fn encode_id(key: &VerifyingKey) -> Result<String, IdentityError> {
    let der = key
        .to_public_key_der()
        .map_err(|e| IdentityError::KeyEncoding(e.to_string()))?;
    Ok(hex::encode(der.as_bytes()))
}

/// Reconstruct a public key from a wire id. Returns None on malformed hex,
/// wrong length, or invalid key bytes.
pub fn key_from_id(id: &str) -> Option<VerifyingKey> {
    if id.len() != ID_HEX_LEN {
        return None;
    }
    let der = hex::decode(id).ok()?;
    VerifyingKey::from_public_key_der(&der).ok()
}

/// Verify a heartbeat signature over `"seq:" + decimal(seq)`.
/// Returns false on any error: malformed signature, mismatch.
pub fn verify_seq_signature(seq: u64, sig_hex: &str, key: &VerifyingKey) -> bool {
    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    key.verify(&seq_signing_bytes(seq), &sig).is_ok()
}

// =============================================================================
// TESTS
// =============================================================================
