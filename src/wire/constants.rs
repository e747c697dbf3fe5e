/// Network magic value used in the BitMessage message header.
///
/// The first 4 bytes of every BitMessage message identify the network and
/// act as a message boundary marker in the TCP stream: when the stream
/// state is unknown, a reader scans forward until it finds this sequence.
///
/// The value is `0xE9BEB4D9` (E9 BE B4 D9 in bytes), serialized
/// big-endian like every other multi-byte integer on this wire.
pub const MAGIC: u32 = 0xE9BE_B4D9;

/// [`MAGIC`] in wire byte order, used by the resynchronizing reader.
pub const MAGIC_BYTES: [u8; 4] = [0xE9, 0xBE, 0xB4, 0xD9];

/// Current BitMessage protocol version.
///
/// Sent in the `version` message during the handshake; a remote
/// advertising any other version is disconnected.
///
/// It is serialized on the wire as a signed 32-bit big-endian integer.
pub const PROTOCOL_VERSION: i32 = 2;

/// The main stream. Streams partition the network into logical routing
/// groups; this node only serves stream 1.
pub const STREAM_ONE: u32 = 1;

/// Upper bound on an advertised payload length.
///
/// Same value the reference client uses to avoid memory blowups; the
/// protocol itself does not restrict payload sizes.
pub const MAX_PAYLOAD_LENGTH: u32 = 180_000_000;

/// Maximum number of entries in an `inv` or `getdata` vector list.
pub const MAX_INVENTORY_ENTRIES: usize = 50_000;

/// Length of the NUL-padded ASCII command field in the message header.
pub const COMMAND_LENGTH: usize = 12;

/// Default TCP port for listening and for dialing peers.
pub const DEFAULT_PORT: u16 = 9090;

/// Service bit advertised in `version` and network-address fields:
/// a normal network node.
pub const SERVICE_NODE_NETWORK: u64 = 1;

/// User agent advertised in our `version` message.
///
/// Matches the vanilla client rather than announcing this implementation.
pub const USER_AGENT: &str = "/PyBitmessage:0.2.8/";
