//! Persistent libp2p identity for a replica.
//!
//! A replica keeps a random 32-byte seed in a small file next to its
//! journal. The libp2p Ed25519 key is derived from that seed, so the peer id
//! survives restarts without storing libp2p's own key encoding.

use std::path::Path;

use anyhow::Context;
use libp2p::identity::Keypair;
use rand::RngCore;
use tracing::info;

const KEYPAIR_CONTEXT: &str = "agora-libp2p-keypair-v1";

/// Derive the libp2p keypair for `seed`.
pub fn device_keypair(seed: &[u8; 32]) -> anyhow::Result<Keypair> {
    let secret = blake3::derive_key(KEYPAIR_CONTEXT, seed);
    Keypair::ed25519_from_bytes(secret).context("Failed to build libp2p keypair")
}

/// Read the hex seed stored at `path`, creating it if missing.
pub fn load_or_create_seed(path: &Path) -> anyhow::Result<[u8; 32]> {
    if path.exists() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read device key {}", path.display()))?;
        let bytes = hex::decode(text.trim()).context("Device key is not hex")?;
        return bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Device key must be 32 bytes"));
    }

    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    std::fs::write(path, hex::encode(seed))
        .with_context(|| format!("Cannot write device key {}", path.display()))?;
    info!(path = %path.display(), "Created device key");
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_is_stable_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("node.key");

        let first = load_or_create_seed(&path).unwrap();
        let second = load_or_create_seed(&path).unwrap();
        assert_eq!(first, second);

        let a = device_keypair(&first).unwrap().public().to_peer_id();
        let b = device_keypair(&second).unwrap().public().to_peer_id();
        assert_eq!(a, b);
    }

    #[test]
    fn corrupt_seed_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "abcd").unwrap();
        assert!(load_or_create_seed(file.path()).is_err());
    }
}
