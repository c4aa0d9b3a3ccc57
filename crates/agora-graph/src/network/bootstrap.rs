//! Seed peer lists.
//!
//! A seed file holds one multiaddr per line; blank lines and `#` comments
//! are skipped:
//!
//! ```text
//! # community seed nodes
//! /ip4/203.0.113.7/udp/4001/quic-v1/p2p/12D3KooW...
//! ```

use std::path::Path;

use libp2p::{multiaddr::Protocol, Multiaddr, PeerId};
use tracing::{info, warn};

/// Read seed addresses from `path`. A missing or unreadable file yields an
/// empty list.
pub fn load_seed_file(path: &Path) -> Vec<Multiaddr> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let addrs = parse_seed_list(&content);
            info!(count = addrs.len(), path = %path.display(), "Loaded seed peers");
            addrs
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read seed file");
            Vec::new()
        }
    }
}

/// Parse seed text, skipping comments and logging malformed lines.
pub fn parse_seed_list(content: &str) -> Vec<Multiaddr> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match line.parse::<Multiaddr>() {
            Ok(addr) => Some(addr),
            Err(e) => {
                warn!(line = %line, error = %e, "Skipping malformed seed address");
                None
            }
        })
        .collect()
}

/// The `/p2p/<id>` component of an address, if present.
pub fn peer_id_of(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter().find_map(|p| match p {
        Protocol::P2p(peer_id) => Some(peer_id),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_empty() {
        assert!(load_seed_file(Path::new("/nonexistent/seeds.txt")).is_empty());
    }

    #[test]
    fn skips_comments_and_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# seeds").unwrap();
        writeln!(file, "/ip4/127.0.0.1/udp/4001/quic-v1").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "not-an-address").unwrap();
        writeln!(file, "  /ip4/127.0.0.2/udp/4001/quic-v1  ").unwrap();

        assert_eq!(load_seed_file(file.path()).len(), 2);
    }

    #[test]
    fn extracts_peer_id() {
        let peer = PeerId::random();
        let addr: Multiaddr = format!("/ip4/127.0.0.1/udp/4001/quic-v1/p2p/{peer}")
            .parse()
            .unwrap();
        assert_eq!(peer_id_of(&addr), Some(peer));
        assert_eq!(
            peer_id_of(&"/ip4/127.0.0.1/udp/4001/quic-v1".parse().unwrap()),
            None
        );
    }
}
