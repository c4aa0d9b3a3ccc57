use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::{MESSAGE_ID_SUFFIX_LEN, PUBKEY_SIZE};
use crate::error::ParseIdError;

fn decode_key(s: &str) -> Result<[u8; PUBKEY_SIZE], ParseIdError> {
    let bytes = hex::decode(s)?;
    if bytes.len() != PUBKEY_SIZE {
        return Err(ParseIdError::Length {
            expected: PUBKEY_SIZE,
            actual: bytes.len(),
        });
    }
    let mut arr = [0u8; PUBKEY_SIZE];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

// Account identity = Ed25519 verifying key (32 bytes), hex on the wire
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct UserPub(pub [u8; 32]);

impl UserPub {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, ParseIdError> {
        decode_key(s).map(Self)
    }

    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl std::fmt::Display for UserPub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for UserPub {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for UserPub {
    type Error = ParseIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<UserPub> for String {
    fn from(id: UserPub) -> Self {
        id.to_hex()
    }
}

// X25519 public key published as `epub`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct EncryptionPub(pub [u8; 32]);

impl EncryptionPub {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, ParseIdError> {
        decode_key(s).map(Self)
    }
}

impl TryFrom<String> for EncryptionPub {
    type Error = ParseIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<EncryptionPub> for String {
    fn from(id: EncryptionPub) -> Self {
        id.to_hex()
    }
}

macro_rules! string_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate() -> Self {
                Self(format!("{}-{}-{}", $prefix, now_ms(), random_suffix(7)))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(ServerId, "srv");
string_id!(GroupId, "grp");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    /// Fresh id for a channel of the given kind, e.g. `voice-1712-k3x9`.
    pub fn generate(kind: ChannelKind) -> Self {
        Self(format!("{}-{}-{}", kind.as_str(), now_ms(), random_suffix(4)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Text,
    Voice,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Text => "text",
            ChannelKind::Voice => "voice",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Member,
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Lowercase base36 string of `len` random characters.
pub fn random_suffix(len: usize) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// `<time>-<random6>`: unique within a message path and roughly sortable.
pub fn message_id(time: i64) -> String {
    format!("{time}-{}", random_suffix(MESSAGE_ID_SUFFIX_LEN))
}

/// Deterministic id of the direct conversation between two identities.
pub fn conversation_id(a: &UserPub, b: &UserPub) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}::{}", first.to_hex(), second.to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_symmetric() {
        let a = UserPub([1u8; 32]);
        let b = UserPub([9u8; 32]);
        assert_eq!(conversation_id(&a, &b), conversation_id(&b, &a));
        assert!(conversation_id(&a, &b).starts_with(&a.to_hex()));
    }

    #[test]
    fn user_pub_rejects_wrong_length() {
        assert!(matches!(
            UserPub::from_hex("abcd"),
            Err(ParseIdError::Length { expected: 32, actual: 2 })
        ));
        assert!(matches!(UserPub::from_hex("zz"), Err(ParseIdError::Hex(_))));
    }

    #[test]
    fn user_pub_serializes_as_hex() {
        let id = UserPub([0xab; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: UserPub = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn generated_ids_carry_prefix() {
        assert!(ServerId::generate().as_str().starts_with("srv-"));
        assert!(GroupId::generate().as_str().starts_with("grp-"));
        assert!(ChannelId::generate(ChannelKind::Voice)
            .as_str()
            .starts_with("voice-"));
    }

    #[test]
    fn message_id_shape() {
        let id = message_id(1_700_000_000_000);
        let (time, suffix) = id.split_once('-').unwrap();
        assert_eq!(time, "1700000000000");
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
