use byteorder::{BigEndian, ByteOrder};
use tracing::warn;

use crate::wire::constants::MAX_INVENTORY_ENTRIES;
use crate::wire::error::WireError;
use crate::wire::message::{
    BroadcastObject, ExtendedNetworkAddress, MsgObject, NetworkAddress, ObjectHash, VersionMessage,
};

/// Implemented by types that can be decoded from a raw message payload.
pub trait Decode: Sized {
    fn decode(payload: &[u8]) -> Result<Self, WireError>;
}

fn take<'a>(p: &'a [u8], c: &mut usize, n: usize, ctx: &'static str) -> Result<&'a [u8], WireError> {
    let bytes = p.get(*c..*c + n).ok_or(WireError::Decode(ctx))?;
    *c += n;
    Ok(bytes)
}

fn read_array<const N: usize>(
    p: &[u8],
    c: &mut usize,
    ctx: &'static str,
) -> Result<[u8; N], WireError> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(p, c, N, ctx)?);
    Ok(out)
}

fn read_u8(p: &[u8], c: &mut usize, ctx: &'static str) -> Result<u8, WireError> {
    let b = *p.get(*c).ok_or(WireError::Decode(ctx))?;
    *c += 1;
    Ok(b)
}

fn read_u16(p: &[u8], c: &mut usize, ctx: &'static str) -> Result<u16, WireError> {
    Ok(BigEndian::read_u16(take(p, c, 2, ctx)?))
}

fn read_u32(p: &[u8], c: &mut usize, ctx: &'static str) -> Result<u32, WireError> {
    Ok(BigEndian::read_u32(take(p, c, 4, ctx)?))
}

fn read_u64(p: &[u8], c: &mut usize, ctx: &'static str) -> Result<u64, WireError> {
    Ok(BigEndian::read_u64(take(p, c, 8, ctx)?))
}

fn read_i32(p: &[u8], c: &mut usize, ctx: &'static str) -> Result<i32, WireError> {
    Ok(BigEndian::read_i32(take(p, c, 4, ctx)?))
}

fn read_i64(p: &[u8], c: &mut usize, ctx: &'static str) -> Result<i64, WireError> {
    Ok(BigEndian::read_i64(take(p, c, 8, ctx)?))
}

/// Reads a BitMessage varint.
///
/// The prefix scheme is bitcoin's (1 byte up to 0xFC, then 0xFD/0xFE/0xFF
/// markers) but the multi-byte branches are big-endian. This codec is
/// deliberately not shared with anything bitcoin-flavored.
pub fn read_varint(p: &[u8], c: &mut usize) -> Result<u64, WireError> {
    match read_u8(p, c, "varint")? {
        0xFD => Ok(read_u16(p, c, "varint: u16")? as u64),
        0xFE => Ok(read_u32(p, c, "varint: u32")? as u64),
        0xFF => read_u64(p, c, "varint: u64"),
        n => Ok(n as u64),
    }
}

/// Reads a varint length followed by that many bytes of UTF-8.
pub fn read_varstring(p: &[u8], c: &mut usize) -> Result<String, WireError> {
    let len = read_varint(p, c)? as usize;
    let bytes = take(p, c, len, "varstring")?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| WireError::Decode("varstring: invalid utf-8"))
}

/// Reads a varint count followed by that many varints (stream lists).
pub fn read_varint_list(p: &[u8], c: &mut usize) -> Result<Vec<u64>, WireError> {
    let count = read_varint(p, c)? as usize;
    let mut values = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        values.push(read_varint(p, c)?);
    }
    Ok(values)
}

fn read_network_address(p: &[u8], c: &mut usize) -> Result<NetworkAddress, WireError> {
    Ok(NetworkAddress {
        services: read_u64(p, c, "net_addr: services")?,
        ip: read_array(p, c, "net_addr: ip")?,
        port: read_u16(p, c, "net_addr: port")?,
    })
}

fn read_extended_network_address(
    p: &[u8],
    c: &mut usize,
) -> Result<ExtendedNetworkAddress, WireError> {
    Ok(ExtendedNetworkAddress {
        time: read_u64(p, c, "addr: time")?,
        stream: read_u32(p, c, "addr: stream")?,
        addr: read_network_address(p, c)?,
    })
}

impl Decode for VersionMessage {
    fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut c = 0;
        let version = read_i32(payload, &mut c, "version: version")?;
        let services = read_u64(payload, &mut c, "version: services")?;
        let timestamp = read_i64(payload, &mut c, "version: timestamp")?;
        let addr_recv = read_network_address(payload, &mut c)?;
        let addr_from = read_network_address(payload, &mut c)?;
        let nonce = read_u64(payload, &mut c, "version: nonce")?;
        let user_agent = read_varstring(payload, &mut c)?;
        let streams = read_varint_list(payload, &mut c)?;
        Ok(VersionMessage {
            version,
            services,
            timestamp,
            addr_recv,
            addr_from,
            nonce,
            user_agent,
            streams,
        })
    }
}

impl Decode for Vec<ExtendedNetworkAddress> {
    fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut c = 0;
        let count = read_varint(payload, &mut c)? as usize;
        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            entries.push(read_extended_network_address(payload, &mut c)?);
        }
        Ok(entries)
    }
}

impl Decode for Vec<ObjectHash> {
    fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut c = 0;
        let count = read_varint(payload, &mut c)? as usize;
        if count > MAX_INVENTORY_ENTRIES {
            return Err(WireError::OversizedInventory(count));
        }
        let mut hashes = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            hashes.push(read_array(payload, &mut c, "inventory: hash")?);
        }
        Ok(hashes)
    }
}

impl Decode for MsgObject {
    fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut c = 0;
        let pow_nonce = read_array(payload, &mut c, "msg: pow nonce")?;
        let time = read_u32(payload, &mut c, "msg: time")?;
        let stream = read_varint(payload, &mut c)?;
        let encrypted = payload[c..].to_vec();
        if encrypted.is_empty() {
            return Err(WireError::Decode("msg: encrypted content empty"));
        }
        Ok(MsgObject {
            pow_nonce,
            time,
            stream,
            encrypted,
        })
    }
}

impl Decode for BroadcastObject {
    fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut c = 0;
        let pow_nonce = read_array(payload, &mut c, "broadcast: pow nonce")?;
        let time = read_u32(payload, &mut c, "broadcast: time")?;
        let broadcast_version = read_varint(payload, &mut c)?;
        if broadcast_version != 1 {
            return Err(WireError::Decode("broadcast: unsupported version"));
        }
        let address_version = read_varint(payload, &mut c)?;
        let stream = read_varint(payload, &mut c)?;
        let behavior = read_u32(payload, &mut c, "broadcast: behavior")?;
        if behavior != 1 {
            warn!(behavior, "unknown broadcast behavior mask");
        }
        let signing_key = read_array(payload, &mut c, "broadcast: signing key")?;
        let encryption_key = read_array(payload, &mut c, "broadcast: encryption key")?;
        let address_hash = read_array(payload, &mut c, "broadcast: address hash")?;
        let encoding = read_varint(payload, &mut c)?;
        let message_length = read_varint(payload, &mut c)? as usize;
        let message = take(payload, &mut c, message_length, "broadcast: message")?.to_vec();
        let signature_length = read_varint(payload, &mut c)? as usize;
        let signature = take(payload, &mut c, signature_length, "broadcast: signature")?.to_vec();
        Ok(BroadcastObject {
            pow_nonce,
            time,
            broadcast_version,
            address_version,
            stream,
            behavior,
            signing_key,
            encryption_key,
            address_hash,
            encoding,
            message,
            signature,
        })
    }
}
