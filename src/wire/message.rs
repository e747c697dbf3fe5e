use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A 32-byte object identifier: the first 32 bytes of the double SHA-512
/// used for inventory advertisement. The trailing 32 bytes of the digest
/// are discarded on the wire.
pub type ObjectHash = [u8; 32];

/// A raw BitMessage frame as it came off the wire.
///
/// The frame consists of:
/// - 4-byte magic value (network identifier and resync marker)
/// - 12-byte NUL-padded ASCII command
/// - 4-byte payload length (big-endian)
/// - 4-byte checksum (first 4 bytes of SHA-512 of the payload)
/// - variable-length payload
///
/// `RawMessage` holds the command with trailing NULs trimmed and the
/// checksum-verified payload. Interpreting the payload is left to the
/// [`Decode`](crate::wire::decode::Decode) implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub command: String,
    pub payload: Vec<u8>,
}

/// The protocol commands this node understands.
///
/// Anything else maps to [`Command::Unknown`] and is ignored without
/// disturbing the framing (the full payload has already been consumed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Version,
    Verack,
    Addr,
    Inv,
    GetData,
    Msg,
    Broadcast,
    Unknown,
}

impl Command {
    pub fn from_name(name: &str) -> Command {
        match name {
            "version" => Command::Version,
            "verack" => Command::Verack,
            "addr" => Command::Addr,
            "inv" => Command::Inv,
            "getdata" => Command::GetData,
            "msg" => Command::Msg,
            "broadcast" => Command::Broadcast,
            _ => Command::Unknown,
        }
    }

    /// The ASCII command string as written on the wire (before padding).
    pub fn name(self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::Verack => "verack",
            Command::Addr => "addr",
            Command::Inv => "inv",
            Command::GetData => "getdata",
            Command::Msg => "msg",
            Command::Broadcast => "broadcast",
            Command::Unknown => "",
        }
    }
}

/// A peer's network identity: 16-byte IP plus TCP port.
///
/// IPv4 addresses are carried in IPv6-mapped form (`::ffff:a.b.c.d`).
/// The canonical rendering is `host:port`, which is also the persisted
/// form in the config file and the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub ip: [u8; 16],
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: [u8; 16], port: u16) -> Endpoint {
        Endpoint { ip, port }
    }

    pub fn from_socket_addr(addr: SocketAddr) -> Endpoint {
        let ip = match addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        };
        Endpoint { ip, port: addr.port() }
    }

    /// The IP in its preferred textual family: mapped IPv4 addresses come
    /// back as `IpAddr::V4`.
    pub fn ip_addr(&self) -> IpAddr {
        let v6 = Ipv6Addr::from(self.ip);
        match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip_addr(), self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

impl FromStr for Endpoint {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Endpoint, Self::Err> {
        s.parse::<SocketAddr>().map(Endpoint::from_socket_addr)
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Endpoint, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// The un-timestamped network address field (26 bytes on the wire):
/// services bitfield, 16-byte IP, port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkAddress {
    pub services: u64,
    pub ip: [u8; 16],
    pub port: u16,
}

impl NetworkAddress {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.ip, self.port)
    }
}

/// The timestamped network address used in `addr` payloads (38 bytes):
/// unix-seconds of last contact, stream number, then the address itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedNetworkAddress {
    pub time: u64,
    pub stream: u32,
    pub addr: NetworkAddress,
}

impl ExtendedNetworkAddress {
    pub fn endpoint(&self) -> Endpoint {
        self.addr.endpoint()
    }
}

/// Decoded `version` payload.
///
/// When a node creates an outgoing connection it immediately advertises
/// its version. No further communication is possible until both peers
/// have exchanged `version` and `verack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    /// Protocol version used by the remote node.
    pub version: i32,
    /// Bitfield of features enabled for this connection.
    pub services: u64,
    /// Standard unix timestamp in seconds.
    pub timestamp: i64,
    /// The address of the node receiving this message.
    pub addr_recv: NetworkAddress,
    /// The address of the emitting node. The IP itself is ignored by the
    /// receiver; loopback is accepted.
    pub addr_from: NetworkAddress,
    /// Random nonce used to detect connections to self.
    pub nonce: u64,
    pub user_agent: String,
    /// The stream numbers the emitting node is interested in.
    pub streams: Vec<u64>,
}

/// Decoded `msg` object: a person-to-person message. The body is stored
/// encrypted and passed through opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgObject {
    /// Nonce found by the sender's proof of work.
    pub pow_nonce: [u8; 8],
    /// Time the message was generated and broadcast (u32 in version 1).
    pub time: u32,
    /// The address' stream number.
    pub stream: u64,
    /// Encrypted message data.
    pub encrypted: Vec<u8>,
}

/// Decoded `broadcast` object (version 1): a message to every subscriber
/// of the sender's address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastObject {
    pub pow_nonce: [u8; 8],
    pub time: u32,
    /// Version of the broadcast format itself; only 1 is supported.
    pub broadcast_version: u64,
    /// Sender's address version, needed to reconstruct the sender address.
    pub address_version: u64,
    pub stream: u64,
    /// Bitfield of behaviors expected from the sender's node.
    pub behavior: u32,
    /// Uncompressed ECC signing key (normally prefixed with 0x04).
    pub signing_key: [u8; 64],
    /// Uncompressed ECC encryption key.
    pub encryption_key: [u8; 64],
    /// Hash of the sender's address, for cheap subscription matching.
    pub address_hash: [u8; 20],
    pub encoding: u64,
    pub message: Vec<u8>,
    /// ECDSA signature over the fields after the proof-of-work nonce.
    pub signature: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips_by_name() {
        for command in [
            Command::Version,
            Command::Verack,
            Command::Addr,
            Command::Inv,
            Command::GetData,
            Command::Msg,
            Command::Broadcast,
        ] {
            assert_eq!(Command::from_name(command.name()), command);
        }
        assert_eq!(Command::from_name("pubkey"), Command::Unknown);
    }

    #[test]
    fn endpoint_renders_mapped_ipv4_as_dotted_quad() {
        let mut ip = [0u8; 16];
        ip[10] = 0xFF;
        ip[11] = 0xFF;
        ip[12..].copy_from_slice(&[192, 168, 11, 13]);
        let endpoint = Endpoint::new(ip, 9090);
        assert_eq!(endpoint.to_string(), "192.168.11.13:9090");
    }

    #[test]
    fn endpoint_parses_both_families() {
        let v4: Endpoint = "10.0.0.1:8444".parse().unwrap();
        assert_eq!(v4.port, 8444);
        assert_eq!(v4.to_string(), "10.0.0.1:8444");

        let v6: Endpoint = "[2001:db8::1]:8444".parse().unwrap();
        assert_eq!(v6.to_string(), "[2001:db8::1]:8444");
    }

    #[test]
    fn endpoint_serializes_as_string() {
        let endpoint: Endpoint = "10.0.0.1:8444".parse().unwrap();
        let json = serde_json::to_string(&endpoint).unwrap();
        assert_eq!(json, "\"10.0.0.1:8444\"");
        let back: Endpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, endpoint);
    }
}
