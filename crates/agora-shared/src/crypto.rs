use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::constants::{
    KDF_CONTEXT_SCOPE_KEY, KDF_CONTEXT_SHARED_SECRET, NONCE_SIZE, PASSWORD_KDF_ITERATIONS,
    PASSWORD_KDF_MEMORY_KIB, SYMMETRIC_KEY_SIZE, WORK_KDF_ITERATIONS, WORK_KDF_MEMORY_KIB,
};
use crate::error::CryptoError;
use crate::types::EncryptionPub;

pub type SymmetricKey = [u8; 32];

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn generate_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt UTF-8 text into the base64 form stored in graph records.
pub fn encrypt_text(key: &SymmetricKey, plaintext: &str) -> Result<String, CryptoError> {
    encrypt(key, plaintext.as_bytes()).map(|bytes| BASE64.encode(bytes))
}

/// Inverse of [`encrypt_text`]. Any malformed input is a decryption failure.
pub fn decrypt_text(key: &SymmetricKey, ciphertext: &str) -> Result<String, CryptoError> {
    let data = BASE64
        .decode(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    let plain = decrypt(key, &data)?;
    String::from_utf8(plain).map_err(|_| CryptoError::DecryptionFailed)
}

/// X25519 agreement followed by a BLAKE3 KDF with domain separation.
/// Both parties obtain the same key.
pub fn derive_shared_secret(own: &StaticSecret, peer: &EncryptionPub) -> SymmetricKey {
    let shared = own.diffie_hellman(&PublicKey::from(peer.0));
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_SHARED_SECRET);
    hasher.update(shared.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Symmetric key for a group or server, derived from its textual key token.
pub fn scope_key(token: &str) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_SCOPE_KEY);
    hasher.update(token.as_bytes());
    *hasher.finalize().as_bytes()
}

fn argon2id(
    secret: &[u8],
    salt: &[u8],
    memory_kib: u32,
    iterations: u32,
) -> Result<SymmetricKey, CryptoError> {
    let params = Params::new(memory_kib, iterations, 1, Some(SYMMETRIC_KEY_SIZE))
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut out = [0u8; SYMMETRIC_KEY_SIZE];
    argon
        .hash_password_into(secret, salt, &mut out)
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
    Ok(out)
}

/// Key that seals an account's private keys.
pub fn password_key(password: &str, salt: &[u8]) -> Result<SymmetricKey, CryptoError> {
    argon2id(
        password.as_bytes(),
        salt,
        PASSWORD_KDF_MEMORY_KIB,
        PASSWORD_KDF_ITERATIONS,
    )
}

/// Work-factor token used as a group or server key. Base64 encoded.
pub fn work_token(data: &str, salt: &str) -> Result<String, CryptoError> {
    // argon2 wants at least 8 bytes of salt
    let salted = blake3::hash(salt.as_bytes());
    let key = argon2id(
        data.as_bytes(),
        &salted.as_bytes()[..16],
        WORK_KDF_MEMORY_KIB,
        WORK_KDF_ITERATIONS,
    )?;
    Ok(BASE64.encode(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_key() -> SymmetricKey {
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        key
    }

    #[test]
    fn test_text_roundtrip() {
        let key = random_key();
        let sealed = encrypt_text(&key, "bonjour à tous").unwrap();
        assert_ne!(sealed, "bonjour à tous");
        assert_eq!(decrypt_text(&key, &sealed).unwrap(), "bonjour à tous");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt_text(&random_key(), "Secret message").unwrap();
        assert!(matches!(
            decrypt_text(&random_key(), &sealed),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = random_key();
        let mut encrypted = encrypt(&key, b"Important data").unwrap();
        let len = encrypted.len();
        encrypted[len - 1] ^= 0xFF;

        assert!(decrypt(&key, &encrypted).is_err());
    }

    #[test]
    fn test_garbage_text_fails() {
        let key = random_key();
        assert!(decrypt_text(&key, "not base64 !!").is_err());
        assert!(decrypt_text(&key, "").is_err());
    }

    #[test]
    fn test_shared_secret_agrees() {
        let alice = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let bob = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let alice_pub = EncryptionPub(PublicKey::from(&alice).to_bytes());
        let bob_pub = EncryptionPub(PublicKey::from(&bob).to_bytes());

        assert_eq!(
            derive_shared_secret(&alice, &bob_pub),
            derive_shared_secret(&bob, &alice_pub)
        );
    }

    #[test]
    fn test_work_token_deterministic() {
        let a = work_token("srv-1-abc", "salt").unwrap();
        let b = work_token("srv-1-abc", "salt").unwrap();
        let c = work_token("srv-1-abc", "other").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(scope_key(&a), scope_key(&c));
    }
}
