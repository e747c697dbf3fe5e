//! Start-up peer discovery.
//!
//! A node with no known peers finds its first connections through a
//! small list of bootstrap hosts, resolved over DNS at start-up. The
//! list matches the reference client's bootstrap entry points.

use std::net::ToSocketAddrs;

use tracing::warn;

use crate::wire::message::Endpoint;

/// Bootstrap hosts: one node known to be up plus the DNS names the
/// reference client bootstraps from.
pub const BOOTSTRAP_SEEDS: &[(&str, u16)] = &[
    ("217.91.97.196", 8444),
    ("bootstrap8080.bitmessage.org", 8080),
    ("bootstrap8444.bitmessage.org", 8444),
];

/// Resolves every bootstrap seed to concrete endpoints. A failed lookup
/// is logged and skipped; the remaining seeds still contribute.
pub fn resolve_bootstrap_peers() -> Vec<Endpoint> {
    resolve_seeds(BOOTSTRAP_SEEDS)
}

fn resolve_seeds(seeds: &[(&str, u16)]) -> Vec<Endpoint> {
    let mut peers = Vec::new();
    for &(host, port) in seeds {
        match (host, port).to_socket_addrs() {
            Ok(addrs) => peers.extend(addrs.map(Endpoint::from_socket_addr)),
            Err(err) => warn!(host, %err, "bootstrap seed lookup failed"),
        }
    }
    peers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_seed_resolves_without_dns() {
        let peers = resolve_seeds(&[("203.0.113.7", 8444)]);
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].to_string(), "203.0.113.7:8444");
    }

    #[test]
    fn failed_lookup_is_skipped() {
        let peers = resolve_seeds(&[("does-not-exist.invalid", 8444), ("203.0.113.7", 8444)]);
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn localhost_resolves_to_loopback() {
        let peers = resolve_seeds(&[("localhost", 9090)]);
        assert!(!peers.is_empty());
        assert!(peers.iter().all(|p| p.port == 9090));
    }
}
