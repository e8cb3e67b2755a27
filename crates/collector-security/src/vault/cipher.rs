//! AES-256-GCM sealing for session bundles.
//!
//! Sealed layout: `version (1) || nonce (12) || ciphertext+tag`. The
//! sanitized account id is bound as associated data, so a file copied under
//! another account's name fails to open.

use crate::{VaultError, VaultResult};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};

const FORMAT_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

/// Symmetric cipher derived from the configured key material.
#[derive(Clone)]
pub struct SessionCipher {
    cipher: Aes256Gcm,
}

impl SessionCipher {
    /// Derives a 256-bit key from arbitrary key material.
    pub fn from_key_material(material: &str) -> VaultResult<Self> {
        let digest = Sha256::digest(material.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&digest).map_err(|_| VaultError::EncryptionFailure)?;
        Ok(Self { cipher })
    }

    /// Encrypts `plaintext` for `account`.
    pub fn seal(&self, account: &str, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: account.as_bytes(),
                },
            )
            .map_err(|_| VaultError::EncryptionFailure)?;

        let mut sealed = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        sealed.push(FORMAT_VERSION);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypts bytes produced by [`seal`](Self::seal) for the same account.
    pub fn open(&self, account: &str, sealed: &[u8]) -> VaultResult<Vec<u8>> {
        let failure = || VaultError::DecryptionFailure {
            account: account.to_string(),
        };

        let (version, rest) = sealed.split_first().ok_or_else(failure)?;
        if *version != FORMAT_VERSION || rest.len() < NONCE_LEN {
            return Err(failure());
        }
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: account.as_bytes(),
                },
            )
            .map_err(|_| failure())
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher").finish_non_exhaustive()
    }
}
