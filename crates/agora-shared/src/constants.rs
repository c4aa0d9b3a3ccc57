/// Protocol version string for libp2p identify
pub const PROTOCOL_VERSION: &str = "/agora/1.0.0";

/// Application name
pub const APP_NAME: &str = "Agora";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Ed25519 / X25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Maximum gossip frame size in bytes (256 KiB)
pub const MAX_MESSAGE_SIZE: usize = 262_144;

/// GossipSub heartbeat interval in seconds
pub const GOSSIPSUB_HEARTBEAT_SECS: u64 = 1;

/// GossipSub topic carrying graph deltas between replicas
pub const GRAPH_TOPIC: &str = "agora/graph/v1";

/// Default QUIC listen port
pub const DEFAULT_QUIC_PORT: u16 = 4001;

/// Default HTTP API port (seed node)
pub const DEFAULT_HTTP_PORT: u16 = 8765;

/// Minimum accepted password length
pub const MIN_PASSWORD_LEN: usize = 16;

/// Default bound for profile and key lookups, in milliseconds
pub const LOOKUP_TIMEOUT_MS: u64 = 5_000;

/// Recovery phrase entropy (128 bits = 12 words)
pub const RECOVERY_ENTROPY_BYTES: usize = 16;
pub const RECOVERY_WORD_COUNT: usize = 12;

/// Length of the hex seed prefix used as the recovery password
pub const RECOVERY_PASSWORD_LEN: usize = 64;

/// Length of the random suffix in generated message ids
pub const MESSAGE_ID_SUFFIX_LEN: usize = 6;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_SHARED_SECRET: &str = "agora-shared-secret-v1";
pub const KDF_CONTEXT_SCOPE_KEY: &str = "agora-scope-key-v1";
pub const KDF_CONTEXT_SIGNED_PAYLOAD: &str = "agora-signed-payload-v1";

/// Argon2id cost for sealing private keys under a password
pub const PASSWORD_KDF_MEMORY_KIB: u32 = 19_456;
pub const PASSWORD_KDF_ITERATIONS: u32 = 2;

/// Argon2id cost for group and server key tokens
pub const WORK_KDF_MEMORY_KIB: u32 = 8_192;
pub const WORK_KDF_ITERATIONS: u32 = 1;

/// Shown in place of message bodies that cannot be decrypted or verified
pub const UNREADABLE_PLACEHOLDER: &str = "[encrypted message]";

/// Alias used when a request or profile carries none
pub const UNKNOWN_ALIAS: &str = "Unknown";

/// Prefix every accepted avatar value must carry
pub const AVATAR_PREFIX: &str = "data:image";

/// Largest avatar data URL accepted (192 KiB), small enough to replicate in
/// a single gossip frame
pub const MAX_AVATAR_BYTES: usize = 196_608;

/// Default channels seeded into every new server
pub const DEFAULT_TEXT_CHANNEL: &str = "general";
pub const DEFAULT_VOICE_CHANNEL: &str = "voice-1";

/// Public STUN servers handed to native peer connections
pub const STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

/// Signals older than the local join time by more than this are stale
pub const SIGNAL_STALENESS_MS: i64 = 10_000;
