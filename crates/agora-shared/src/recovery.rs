//! Recovery phrases.
//!
//! A phrase is a 12-word BIP39 mnemonic (128 bits of entropy, English
//! wordlist). The account secret it unlocks is the first 64 hex characters
//! of the mnemonic's seed, used as a surrogate password.

use bip39::{Language, Mnemonic};
use rand::RngCore;

use crate::constants::{RECOVERY_ENTROPY_BYTES, RECOVERY_PASSWORD_LEN, RECOVERY_WORD_COUNT};
use crate::error::RecoveryError;

/// Generate a fresh 12-word phrase.
pub fn generate_phrase() -> Result<String, RecoveryError> {
    let mut entropy = [0u8; RECOVERY_ENTROPY_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
        .map_err(|e| RecoveryError::Generation(e.to_string()))?;
    entropy.fill(0);
    Ok(mnemonic.to_string())
}

fn parse(phrase: &str) -> Result<Mnemonic, RecoveryError> {
    let normalized = phrase
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    let mnemonic = Mnemonic::parse_in_normalized(Language::English, &normalized)
        .map_err(|e| RecoveryError::InvalidMnemonic(e.to_string()))?;
    if mnemonic.word_count() != RECOVERY_WORD_COUNT {
        return Err(RecoveryError::InvalidMnemonic(format!(
            "expected {RECOVERY_WORD_COUNT} words, got {}",
            mnemonic.word_count()
        )));
    }
    Ok(mnemonic)
}

/// Checksum and wordlist validation.
pub fn validate_phrase(phrase: &str) -> bool {
    parse(phrase).is_ok()
}

/// Surrogate password derived from a valid phrase.
pub fn phrase_password(phrase: &str) -> Result<String, RecoveryError> {
    let mnemonic = parse(phrase)?;
    let seed = mnemonic.to_seed_normalized("");
    let mut password = hex::encode(seed);
    password.truncate(RECOVERY_PASSWORD_LEN);
    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_twelve_valid_words() {
        let phrase = generate_phrase().unwrap();
        assert_eq!(phrase.split(' ').count(), 12);
        assert!(validate_phrase(&phrase));
    }

    #[test]
    fn password_is_deterministic_and_whitespace_tolerant() {
        let phrase = generate_phrase().unwrap();
        let messy = format!("  {}  ", phrase.to_uppercase().replace(' ', "   "));

        let a = phrase_password(&phrase).unwrap();
        let b = phrase_password(&messy).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn rejects_bad_checksum_and_unknown_words() {
        let bad_checksum = "abandon abandon abandon abandon abandon abandon \
                            abandon abandon abandon abandon abandon abandon";
        assert!(!validate_phrase(bad_checksum));
        assert!(matches!(
            phrase_password("definitely not a recovery phrase"),
            Err(RecoveryError::InvalidMnemonic(_))
        ));
    }

    #[test]
    fn known_vector_is_valid() {
        let phrase = "abandon abandon abandon abandon abandon abandon \
                      abandon abandon abandon abandon abandon about";
        assert!(validate_phrase(phrase));
        // BIP39 reference seed for this phrase with an empty passphrase
        assert_eq!(
            phrase_password(phrase).unwrap(),
            "5eb00bbddcf069084889a8ab9155568165f5c453ccb85e70811aaed6f6da5fc1"
        );
    }
}
