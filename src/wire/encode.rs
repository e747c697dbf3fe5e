use std::net::Ipv6Addr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::wire::constants::{
    MAX_INVENTORY_ENTRIES, PROTOCOL_VERSION, SERVICE_NODE_NETWORK,
};
use crate::wire::error::WireError;
use crate::wire::message::{Endpoint, MsgObject, ObjectHash};

/// Writes a BitMessage varint, big-endian in the multi-byte branches.
pub fn write_varint(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xFC => out.push(value as u8),
        0xFD..=0xFFFF => {
            out.push(0xFD);
            out.extend_from_slice(&(value as u16).to_be_bytes());
        }
        0x1_0000..=0xFFFF_FFFF => {
            out.push(0xFE);
            out.extend_from_slice(&(value as u32).to_be_bytes());
        }
        _ => {
            out.push(0xFF);
            out.extend_from_slice(&value.to_be_bytes());
        }
    }
}

/// Writes a varint length followed by the raw bytes of the string.
pub fn write_varstring(out: &mut Vec<u8>, value: &str) {
    write_varint(out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}

/// Writes a varint count followed by each value as a varint.
pub fn write_varint_list(out: &mut Vec<u8>, values: &[u64]) {
    write_varint(out, values.len() as u64);
    for &value in values {
        write_varint(out, value);
    }
}

/// Writes an un-timestamped network address field (26 bytes).
///
/// A `None` endpoint refers to this node itself: the IP is filled with
/// the IPv6 loopback, but the port is our real listening port.
pub fn write_network_address(out: &mut Vec<u8>, endpoint: Option<Endpoint>, own_port: u16) {
    out.extend_from_slice(&SERVICE_NODE_NETWORK.to_be_bytes());
    match endpoint {
        Some(endpoint) => {
            out.extend_from_slice(&endpoint.ip);
            out.extend_from_slice(&endpoint.port.to_be_bytes());
        }
        None => {
            out.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
            out.extend_from_slice(&own_port.to_be_bytes());
        }
    }
}

/// Builds a `version` payload announcing this node to `dest`.
///
/// Layout:
///
/// ```text
/// i32       protocol version
/// u64       services
/// i64       timestamp (unix seconds)
/// net_addr  addr_recv (the destination)
/// net_addr  addr_from (ourselves; IP is ignored by the receiver)
/// u64       nonce
/// varstring user agent
/// varints   stream numbers
/// ```
pub fn build_version_payload(
    dest: Option<Endpoint>,
    own_port: u16,
    nonce: u64,
    user_agent: &str,
    streams: &[u64],
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(128);
    payload.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    payload.extend_from_slice(&SERVICE_NODE_NETWORK.to_be_bytes());
    payload.extend_from_slice(&unix_now().to_be_bytes());
    write_network_address(&mut payload, dest, own_port);
    write_network_address(&mut payload, None, own_port);
    payload.extend_from_slice(&nonce.to_be_bytes());
    write_varstring(&mut payload, user_agent);
    write_varint_list(&mut payload, streams);
    payload
}

/// Builds the shared `inv`/`getdata` payload: a varint count followed by
/// the 32-byte hashes.
pub fn build_inventory_payload(hashes: &[ObjectHash]) -> Result<Vec<u8>, WireError> {
    if hashes.len() > MAX_INVENTORY_ENTRIES {
        return Err(WireError::OversizedInventory(hashes.len()));
    }
    let mut payload = Vec::with_capacity(1 + hashes.len() * 32);
    write_varint(&mut payload, hashes.len() as u64);
    for hash in hashes {
        payload.extend_from_slice(hash);
    }
    Ok(payload)
}

/// Builds a `msg` object payload from its parts.
pub fn build_msg_payload(msg: &MsgObject) -> Vec<u8> {
    let mut payload = Vec::with_capacity(13 + msg.encrypted.len());
    payload.extend_from_slice(&msg.pow_nonce);
    payload.extend_from_slice(&msg.time.to_be_bytes());
    write_varint(&mut payload, msg.stream);
    payload.extend_from_slice(&msg.encrypted);
    payload
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::decode::{self, Decode};
    use crate::wire::message::VersionMessage;

    #[test]
    fn varint_picks_smallest_branch() {
        let mut out = vec![];
        write_varint(&mut out, 252);
        assert_eq!(out, vec![0xFC]);

        out.clear();
        write_varint(&mut out, 4217);
        assert_eq!(out, vec![0xFD, 0x10, 0x79]);

        out.clear();
        write_varint(&mut out, 0x12345678);
        assert_eq!(out, vec![0xFE, 0x12, 0x34, 0x56, 0x78]);

        out.clear();
        write_varint(&mut out, 0x1_0000_0000);
        assert_eq!(out, vec![0xFF, 0, 0, 0, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn version_payload_parses_back() {
        let dest: Endpoint = "192.168.11.13:8444".parse().unwrap();
        let payload = build_version_payload(Some(dest), 9090, 0xDEAD_BEEF, "/PyBitmessage:0.2.8/", &[1]);
        let version = VersionMessage::decode(&payload).unwrap();
        assert_eq!(version.version, PROTOCOL_VERSION);
        assert_eq!(version.services, SERVICE_NODE_NETWORK);
        assert_eq!(version.addr_recv.endpoint(), dest);
        assert_eq!(version.addr_from.endpoint().to_string(), "[::1]:9090");
        assert_eq!(version.nonce, 0xDEAD_BEEF);
        assert_eq!(version.user_agent, "/PyBitmessage:0.2.8/");
        assert_eq!(version.streams, vec![1]);
    }

    #[test]
    fn self_address_is_loopback_with_real_port() {
        let mut out = vec![];
        write_network_address(&mut out, None, 9090);
        assert_eq!(out.len(), 26);
        assert_eq!(&out[..8], &1u64.to_be_bytes());
        assert_eq!(&out[8..24], &Ipv6Addr::LOCALHOST.octets());
        assert_eq!(&out[24..], &9090u16.to_be_bytes());
    }

    #[test]
    fn inventory_payload_round_trips() {
        let hashes = vec![[0x11u8; 32], [0x22u8; 32]];
        let payload = build_inventory_payload(&hashes).unwrap();
        let mut c = 0;
        assert_eq!(decode::read_varint(&payload, &mut c).unwrap(), 2);
        let back = Vec::<ObjectHash>::decode(&payload).unwrap();
        assert_eq!(back, hashes);
    }

    #[test]
    fn inventory_payload_rejects_oversized_list() {
        let hashes = vec![[0u8; 32]; MAX_INVENTORY_ENTRIES + 1];
        assert!(matches!(
            build_inventory_payload(&hashes),
            Err(WireError::OversizedInventory(_))
        ));
    }

    #[test]
    fn msg_payload_matches_decoder() {
        let msg = MsgObject {
            pow_nonce: [0, 0, 0, 0, 0, 0x14, 0x6B, 0x2A],
            time: 1_366_969_543,
            stream: 1,
            encrypted: vec![0xAB; 32],
        };
        let payload = build_msg_payload(&msg);
        assert_eq!(MsgObject::decode(&payload).unwrap(), msg);
    }
}
