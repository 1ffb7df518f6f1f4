// crates/server/src/crypto.rs
//! NaCl-box transit decryption for provider credentials.
//!
//! Clients fetch the server's X25519 public key, seal the API key to it
//! with an ephemeral sender key, and send the sealed blob in the request.
//! Wire format, base64-encoded: ephemeral pubkey (32) || nonce (24) ||
//! ciphertext. The plaintext key lives only in memory for the duration of
//! the job or stream that needs it; at-rest credential encryption is a
//! different concern and not handled here.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use crypto_box::{
    aead::{Aead, AeadCore, OsRng},
    PublicKey, SalsaBox, SecretKey,
};
use thiserror::Error;
use tracing::info;

const EPHEMERAL_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("identity file error: {0}")]
    Identity(String),

    #[error("malformed sealed credential: {0}")]
    Malformed(String),

    #[error("credential decryption failed")]
    Decrypt,
}

/// The server's long-lived decryption identity.
#[derive(Clone)]
pub struct ServerIdentity {
    secret: SecretKey,
}

impl ServerIdentity {
    /// Load the identity from `path`, generating and persisting a fresh
    /// one on first run.
    pub fn load_or_create(path: &Path) -> Result<Self, CryptoError> {
        if let Ok(encoded) = std::fs::read_to_string(path) {
            let bytes = STANDARD
                .decode(encoded.trim())
                .map_err(|e| CryptoError::Identity(format!("bad base64 in {}: {e}", path.display())))?;
            let bytes: [u8; 32] = bytes
                .try_into()
                .map_err(|_| CryptoError::Identity("identity key must be 32 bytes".into()))?;
            return Ok(Self { secret: SecretKey::from(bytes) });
        }

        let secret = SecretKey::generate(&mut OsRng);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CryptoError::Identity(e.to_string()))?;
        }
        std::fs::write(path, STANDARD.encode(secret.to_bytes()))
            .map_err(|e| CryptoError::Identity(e.to_string()))?;
        info!(path = %path.display(), "created new server identity");
        Ok(Self { secret })
    }

    /// Ephemeral identity for tests.
    pub fn generate() -> Self {
        Self { secret: SecretKey::generate(&mut OsRng) }
    }

    /// Base64 public key clients seal credentials to.
    pub fn public_key_b64(&self) -> String {
        STANDARD.encode(self.secret.public_key().as_bytes())
    }

    /// Unseal a credential sent by a client.
    pub fn decrypt_credential(&self, sealed_b64: &str) -> Result<String, CryptoError> {
        let wire = STANDARD
            .decode(sealed_b64.trim())
            .map_err(|e| CryptoError::Malformed(format!("bad base64: {e}")))?;
        if wire.len() < EPHEMERAL_KEY_LEN + NONCE_LEN {
            return Err(CryptoError::Malformed("sealed blob too short".into()));
        }

        let (ephemeral, rest) = wire.split_at(EPHEMERAL_KEY_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let ephemeral: [u8; 32] =
            ephemeral.try_into().map_err(|_| CryptoError::Malformed("bad ephemeral key".into()))?;
        let sender = PublicKey::from(ephemeral);

        let salsa_box = SalsaBox::new(&sender, &self.secret);
        let plaintext = salsa_box
            .decrypt(crypto_box::Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
    }
}

/// Seal `plaintext` to a server public key. The production client does
/// this on its side; the server carries it for tests and tooling.
pub fn seal_for_server(server_pubkey_b64: &str, plaintext: &str) -> Result<String, CryptoError> {
    let pubkey_bytes = STANDARD
        .decode(server_pubkey_b64.trim())
        .map_err(|e| CryptoError::Malformed(format!("bad pubkey base64: {e}")))?;
    let pubkey_bytes: [u8; 32] = pubkey_bytes
        .try_into()
        .map_err(|_| CryptoError::Malformed("pubkey must be 32 bytes".into()))?;
    let server_pub = PublicKey::from(pubkey_bytes);

    let ephemeral = SecretKey::generate(&mut OsRng);
    let salsa_box = SalsaBox::new(&server_pub, &ephemeral);
    let nonce = SalsaBox::generate_nonce(&mut OsRng);
    let ciphertext = salsa_box
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::Decrypt)?;

    let mut wire = ephemeral.public_key().as_bytes().to_vec();
    wire.extend_from_slice(&nonce);
    wire.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(wire))
}
