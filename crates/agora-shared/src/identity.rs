use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::constants::KDF_CONTEXT_SIGNED_PAYLOAD;
use crate::crypto::{self, SymmetricKey};
use crate::error::{CryptoError, IdentityError};
use crate::types::{EncryptionPub, UserPub};

/// An account: an Ed25519 signing pair (`pub`) plus an X25519 encryption
/// pair (`epub`). Private halves never leave the process and are zeroized
/// when the value is dropped.
#[derive(Clone)]
pub struct Identity {
    alias: String,
    signing_key: SigningKey,
    encryption_key: StaticSecret,
}

/// Private key material sealed under a password, as stored in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedKeys {
    pub salt: String,
    pub ciphertext: String,
}

#[derive(Debug, Clone)]
pub struct SignedCiphertext {
    pub ciphertext: String,
    pub signature: String,
}

impl Identity {
    pub fn generate(alias: &str) -> Self {
        Self {
            alias: alias.to_string(),
            signing_key: SigningKey::generate(&mut OsRng),
            encryption_key: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn from_secret_bytes(alias: &str, signing: &[u8; 32], encryption: &[u8; 32]) -> Self {
        Self {
            alias: alias.to_string(),
            signing_key: SigningKey::from_bytes(signing),
            encryption_key: StaticSecret::from(*encryption),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn pub_key(&self) -> UserPub {
        UserPub(self.signing_key.verifying_key().to_bytes())
    }

    pub fn epub(&self) -> EncryptionPub {
        EncryptionPub(PublicKey::from(&self.encryption_key).to_bytes())
    }

    pub fn encryption_secret(&self) -> &StaticSecret {
        &self.encryption_key
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Encrypt `plaintext` under `key` and sign the resulting ciphertext.
    pub fn encrypt_and_sign(
        &self,
        plaintext: &str,
        key: &SymmetricKey,
    ) -> Result<SignedCiphertext, CryptoError> {
        let ciphertext = crypto::encrypt_text(key, plaintext)?;
        let signature = self.sign(&signing_input(&ciphertext));
        Ok(SignedCiphertext {
            ciphertext,
            signature: BASE64.encode(signature.to_bytes()),
        })
    }

    /// Seal both private keys under a password-derived key.
    pub fn seal(&self, password: &str) -> Result<SealedKeys, CryptoError> {
        let salt = crypto::generate_salt();
        let key = crypto::password_key(password, &salt)?;

        let mut secrets = [0u8; 64];
        secrets[..32].copy_from_slice(self.signing_key.as_bytes());
        secrets[32..].copy_from_slice(&self.encryption_key.to_bytes());
        let ciphertext = crypto::encrypt(&key, &secrets);
        secrets.fill(0);

        Ok(SealedKeys {
            salt: BASE64.encode(salt),
            ciphertext: BASE64.encode(ciphertext?),
        })
    }

    /// Open sealed keys. Fails with `WrongPassword` on any mismatch.
    pub fn unseal(alias: &str, sealed: &SealedKeys, password: &str) -> Result<Self, IdentityError> {
        let salt = BASE64
            .decode(&sealed.salt)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let data = BASE64
            .decode(&sealed.ciphertext)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let key = crypto::password_key(password, &salt)?;
        let mut secrets = crypto::decrypt(&key, &data).map_err(|_| IdentityError::WrongPassword)?;
        if secrets.len() != 64 {
            return Err(IdentityError::InvalidKeyBytes);
        }

        let mut signing = [0u8; 32];
        let mut encryption = [0u8; 32];
        signing.copy_from_slice(&secrets[..32]);
        encryption.copy_from_slice(&secrets[32..]);
        secrets.fill(0);

        let identity = Self::from_secret_bytes(alias, &signing, &encryption);
        signing.fill(0);
        encryption.fill(0);
        Ok(identity)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("alias", &self.alias)
            .field("pub", &self.pub_key().short())
            .finish_non_exhaustive()
    }
}

fn signing_input(ciphertext: &str) -> [u8; 32] {
    blake3::derive_key(KDF_CONTEXT_SIGNED_PAYLOAD, ciphertext.as_bytes())
}

/// Check that `signature` (base64) was produced by `signer` over `ciphertext`.
pub fn verify_ciphertext(
    signer: &UserPub,
    ciphertext: &str,
    signature: &str,
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(&signer.0).map_err(|_| IdentityError::InvalidKeyBytes)?;
    let raw = BASE64
        .decode(signature)
        .map_err(|_| IdentityError::BadSignature)?;
    let signature = Signature::from_slice(&raw).map_err(|_| IdentityError::BadSignature)?;
    verifying_key
        .verify(&signing_input(ciphertext), &signature)
        .map_err(|_| IdentityError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_unseal_roundtrip() {
        let id = Identity::generate("alice");
        let sealed = id.seal("correct horse battery staple").unwrap();
        let restored = Identity::unseal("alice", &sealed, "correct horse battery staple").unwrap();

        assert_eq!(restored.pub_key(), id.pub_key());
        assert_eq!(restored.epub(), id.epub());
        assert_eq!(restored.alias(), "alice");
    }

    #[test]
    fn test_unseal_wrong_password() {
        let id = Identity::generate("alice");
        let sealed = id.seal("correct horse battery staple").unwrap();
        assert!(matches!(
            Identity::unseal("alice", &sealed, "incorrect horse battery"),
            Err(IdentityError::WrongPassword)
        ));
    }

    #[test]
    fn test_sign_verify_ciphertext() {
        let id = Identity::generate("alice");
        let key = [7u8; 32];
        let signed = id.encrypt_and_sign("hello", &key).unwrap();

        assert!(verify_ciphertext(&id.pub_key(), &signed.ciphertext, &signed.signature).is_ok());
        assert_eq!(
            crypto::decrypt_text(&key, &signed.ciphertext).unwrap(),
            "hello"
        );

        let other = Identity::generate("mallory");
        assert!(
            verify_ciphertext(&other.pub_key(), &signed.ciphertext, &signed.signature).is_err()
        );
    }

    #[test]
    fn test_debug_hides_secrets() {
        let id = Identity::generate("alice");
        let rendered = format!("{id:?}");
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains(&hex::encode(id.signing_key.as_bytes())));
    }
}
