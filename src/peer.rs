//! Per-connection peer workers.
//!
//! Each live connection is owned by exactly one worker. The worker
//! drives the version/verack handshake, enforces the command ordering
//! rules, and translates everything the server loop needs to know into
//! [`Event`]s on a channel. Workers never touch shared state directly,
//! and they never raise beyond their connection: every failure becomes a
//! `Removed` event and the worker exits.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, SystemTime};

use crossbeam_channel::Sender;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

use crate::pow;
use crate::wire::codec::{read_message, send_message};
use crate::wire::constants::{PROTOCOL_VERSION, STREAM_ONE, USER_AGENT};
use crate::wire::decode::Decode;
use crate::wire::encode;
use crate::wire::error::WireError;
use crate::wire::message::{
    BroadcastObject, Command, Endpoint, ExtendedNetworkAddress, MsgObject, ObjectHash, RawMessage,
    VersionMessage,
};

/// Deadline for connecting and for each transport read. A peer that
/// stays silent longer than this is disconnected.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum wait before redialing an endpoint that was contacted recently.
pub const RETRY_PERIOD: Duration = Duration::from_secs(30 * 60);

/// Everything a worker needs to introduce this node to a peer. Built
/// once in the node constructor and cloned into each worker; nothing
/// here is process-global.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Random value echoed in `version` to detect connections to self.
    pub nonce: u64,
    pub user_agent: String,
    /// Stream numbers this node is interested in.
    pub streams: Vec<u64>,
    /// Our listening port, advertised in the self network address.
    pub port: u16,
}

impl Identity {
    pub fn generate(port: u16) -> Identity {
        Identity {
            nonce: rand::thread_rng().gen(),
            user_agent: USER_AGENT.to_owned(),
            streams: vec![STREAM_ONE as u64],
            port,
        }
    }
}

/// Parsed data flowing from the peer workers to the server loop.
pub enum Event {
    /// Candidate endpoints learned from `addr` gossip.
    Addrs(Vec<ExtendedNetworkAddress>),
    /// A peer finished the handshake.
    Added(Endpoint, u32),
    /// A peer connection ended or failed, including dial failures.
    Removed(Endpoint, u32),
    /// A peer advertised objects; `reply` writes back to it.
    Inv {
        from: Endpoint,
        hashes: Vec<ObjectHash>,
        reply: Box<dyn Write + Send>,
    },
    /// A peer asked for objects; `reply` writes back to it.
    GetData {
        hashes: Vec<ObjectHash>,
        reply: Box<dyn Write + Send>,
    },
    /// A proof-of-work-verified message object. `raw` is the exact
    /// payload as received, for storage and re-serving.
    Msg { msg: MsgObject, raw: Vec<u8> },
    /// A proof-of-work-verified broadcast object.
    Broadcast {
        broadcast: BroadcastObject,
        raw: Vec<u8>,
    },
}

/// A duplex byte stream a worker can run against, plus the ability to
/// hand out an independent writer for replies dispatched later from the
/// server loop.
pub trait Transport: Read + Write {
    fn reply_handle(&self) -> io::Result<Box<dyn Write + Send>>;
}

impl Transport for TcpStream {
    fn reply_handle(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(self.try_clone()?))
    }
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("protocol violation: {0}")]
    Violation(&'static str),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(i32),
    #[error("remote nonce matches ours, connected to self")]
    SelfConnection,
    #[error("event channel closed")]
    ChannelClosed,
}

/// The state machine for one connection.
pub struct Peer<S: Transport> {
    stream: S,
    endpoint: Endpoint,
    identity: Identity,
    events: Sender<Event>,
    outbound: bool,
    version_sent: bool,
    version_received: bool,
    verack_sent: bool,
    verack_received: bool,
    announced: bool,
}

impl Peer<TcpStream> {
    /// Dials `endpoint` and runs the worker to completion. Declines to
    /// redial an endpoint contacted less than [`RETRY_PERIOD`] ago.
    pub fn connect(
        endpoint: Endpoint,
        last_contacted: Option<SystemTime>,
        identity: Identity,
        events: Sender<Event>,
    ) {
        if let Some(at) = last_contacted {
            if at.elapsed().map(|since| since < RETRY_PERIOD).unwrap_or(true) {
                debug!(%endpoint, "contacted recently, waiting before the next try");
                return;
            }
        }
        let stream = match TcpStream::connect_timeout(&endpoint.socket_addr(), CONNECTION_TIMEOUT) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%endpoint, %err, "dial failed");
                let _ = events.send(Event::Removed(endpoint, STREAM_ONE));
                return;
            }
        };
        if let Err(err) = apply_timeouts(&stream) {
            warn!(%endpoint, %err, "could not set socket deadlines");
            let _ = events.send(Event::Removed(endpoint, STREAM_ONE));
            return;
        }
        Peer::outbound(stream, endpoint, identity, events).run();
    }

    /// Runs a worker for an accepted connection.
    pub fn accept(stream: TcpStream, identity: Identity, events: Sender<Event>) {
        let endpoint = match stream.peer_addr() {
            Ok(addr) => Endpoint::from_socket_addr(addr),
            Err(err) => {
                warn!(%err, "accepted connection without a peer address");
                return;
            }
        };
        if let Err(err) = apply_timeouts(&stream) {
            warn!(%endpoint, %err, "could not set socket deadlines");
            let _ = events.send(Event::Removed(endpoint, STREAM_ONE));
            return;
        }
        Peer::inbound(stream, endpoint, identity, events).run();
    }
}

fn apply_timeouts(stream: &TcpStream) -> io::Result<()> {
    stream.set_read_timeout(Some(CONNECTION_TIMEOUT))?;
    stream.set_write_timeout(Some(CONNECTION_TIMEOUT))
}

impl<S: Transport> Peer<S> {
    pub fn outbound(stream: S, endpoint: Endpoint, identity: Identity, events: Sender<Event>) -> Self {
        Peer::new(stream, endpoint, identity, events, true)
    }

    pub fn inbound(stream: S, endpoint: Endpoint, identity: Identity, events: Sender<Event>) -> Self {
        Peer::new(stream, endpoint, identity, events, false)
    }

    fn new(
        stream: S,
        endpoint: Endpoint,
        identity: Identity,
        events: Sender<Event>,
        outbound: bool,
    ) -> Self {
        Peer {
            stream,
            endpoint,
            identity,
            events,
            outbound,
            version_sent: false,
            version_received: false,
            verack_sent: false,
            verack_received: false,
            announced: false,
        }
    }

    /// Serves the connection until it fails or the peer goes away, then
    /// reports the endpoint as removed. Never panics across the
    /// connection boundary.
    pub fn run(mut self) {
        if let Err(err) = self.serve() {
            debug!(endpoint = %self.endpoint, %err, "connection closed");
        }
        let _ = self.events.send(Event::Removed(self.endpoint, STREAM_ONE));
    }

    fn serve(&mut self) -> Result<(), PeerError> {
        if self.outbound {
            self.send_version()?;
        }
        loop {
            let raw = read_message(&mut self.stream)?;
            self.dispatch(raw)?;
        }
    }

    fn dispatch(&mut self, raw: RawMessage) -> Result<(), PeerError> {
        match Command::from_name(&raw.command) {
            Command::Version => self.handle_version(&raw.payload),
            Command::Verack => self.handle_verack(),
            Command::Addr => self.handle_addr(&raw.payload),
            Command::Inv => self.handle_inv(&raw.payload),
            Command::GetData => self.handle_getdata(&raw.payload),
            Command::Msg => self.handle_msg(&raw.payload),
            Command::Broadcast => self.handle_broadcast(&raw.payload),
            Command::Unknown => {
                debug!(command = %raw.command, "ignoring unknown command");
                Ok(())
            }
        }
    }

    fn established(&self) -> bool {
        self.verack_sent && self.verack_received
    }

    fn handle_version(&mut self, payload: &[u8]) -> Result<(), PeerError> {
        if self.version_received {
            return Err(PeerError::Violation("duplicate version"));
        }
        let version = VersionMessage::decode(payload)?;
        if version.nonce == self.identity.nonce {
            return Err(PeerError::SelfConnection);
        }
        if version.version != PROTOCOL_VERSION {
            return Err(PeerError::UnsupportedVersion(version.version));
        }
        self.version_received = true;
        // An inbound peer is waiting for our version before it will
        // verack; answer with it before our verack.
        if !self.version_sent {
            self.send_version()?;
        }
        if !self.verack_sent {
            send_message(&mut self.stream, Command::Verack.name(), &[])?;
            self.verack_sent = true;
        }
        self.announce_if_established()
    }

    fn handle_verack(&mut self) -> Result<(), PeerError> {
        if !self.version_sent {
            return Err(PeerError::Violation("verack before version was sent"));
        }
        if self.verack_received {
            return Err(PeerError::Violation("duplicate verack"));
        }
        self.verack_received = true;
        self.announce_if_established()
    }

    fn handle_addr(&mut self, payload: &[u8]) -> Result<(), PeerError> {
        self.require_established("addr before handshake completed")?;
        let addrs = Vec::<ExtendedNetworkAddress>::decode(payload)?;
        self.forward(Event::Addrs(addrs))
    }

    fn handle_inv(&mut self, payload: &[u8]) -> Result<(), PeerError> {
        self.require_established("inv before handshake completed")?;
        let hashes = Vec::<ObjectHash>::decode(payload)?;
        let reply = self.stream.reply_handle().map_err(WireError::Io)?;
        self.forward(Event::Inv {
            from: self.endpoint,
            hashes,
            reply,
        })
    }

    fn handle_getdata(&mut self, payload: &[u8]) -> Result<(), PeerError> {
        self.require_established("getdata before handshake completed")?;
        let hashes = Vec::<ObjectHash>::decode(payload)?;
        let reply = self.stream.reply_handle().map_err(WireError::Io)?;
        self.forward(Event::GetData { hashes, reply })
    }

    fn handle_msg(&mut self, payload: &[u8]) -> Result<(), PeerError> {
        self.require_established("msg before handshake completed")?;
        let (nonce, body) = split_pow_nonce(payload)?;
        if pow::verify(body, &nonce).is_err() {
            // The object is dropped but the peer stays connected.
            warn!(endpoint = %self.endpoint, "dropping msg with insufficient proof of work");
            return Ok(());
        }
        let msg = MsgObject::decode(payload)?;
        self.forward(Event::Msg {
            msg,
            raw: payload.to_vec(),
        })
    }

    fn handle_broadcast(&mut self, payload: &[u8]) -> Result<(), PeerError> {
        self.require_established("broadcast before handshake completed")?;
        let (nonce, body) = split_pow_nonce(payload)?;
        if pow::verify(body, &nonce).is_err() {
            warn!(endpoint = %self.endpoint, "dropping broadcast with insufficient proof of work");
            return Ok(());
        }
        let broadcast = BroadcastObject::decode(payload)?;
        self.forward(Event::Broadcast {
            broadcast,
            raw: payload.to_vec(),
        })
    }

    fn send_version(&mut self) -> Result<(), PeerError> {
        let payload = encode::build_version_payload(
            Some(self.endpoint),
            self.identity.port,
            self.identity.nonce,
            &self.identity.user_agent,
            &self.identity.streams,
        );
        send_message(&mut self.stream, Command::Version.name(), &payload)?;
        self.version_sent = true;
        Ok(())
    }

    fn announce_if_established(&mut self) -> Result<(), PeerError> {
        if self.established() && !self.announced {
            self.announced = true;
            self.forward(Event::Added(self.endpoint, STREAM_ONE))?;
        }
        Ok(())
    }

    fn require_established(&self, context: &'static str) -> Result<(), PeerError> {
        if self.established() {
            Ok(())
        } else {
            Err(PeerError::Violation(context))
        }
    }

    fn forward(&self, event: Event) -> Result<(), PeerError> {
        self.events.send(event).map_err(|_| PeerError::ChannelClosed)
    }
}

fn split_pow_nonce(payload: &[u8]) -> Result<([u8; 8], &[u8]), WireError> {
    if payload.len() < pow::NONCE_LENGTH {
        return Err(WireError::Decode("object: pow nonce"));
    }
    let mut nonce = [0u8; 8];
    nonce.copy_from_slice(&payload[..pow::NONCE_LENGTH]);
    Ok((nonce, &payload[pow::NONCE_LENGTH..]))
}
