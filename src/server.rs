//! The central server loop.
//!
//! A single [`Node`] is the only mutator of the peer directories, the
//! object inventory, the unreachability filter, and the persisted
//! config. Peer workers feed it parsed events over one channel; it
//! reacts by mutating state and dispatching outbound work (handshake
//! workers, `getdata` requests, object deliveries). The loop itself runs
//! for the process lifetime.

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::TcpListener;
use std::thread;
use std::time::{Duration, SystemTime};

use crossbeam_channel::{select, tick, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::bloom::BloomFilter;
use crate::boot;
use crate::config::Config;
use crate::inventory::Inventory;
use crate::peer::{Event, Identity, Peer};
use crate::wire::codec::send_message;
use crate::wire::constants::STREAM_ONE;
use crate::wire::encode;
use crate::wire::error::WireError;
use crate::wire::message::{Command, Endpoint, ExtendedNetworkAddress, ObjectHash};

/// How many established peers the node aims for on the main stream.
pub const TARGET_CONNECTED_PEERS: usize = 15;

/// Capacity and false-positive rate of the unreachable-IP filter.
const UNREACHABLE_FILTER_ITEMS: usize = 10_000;
const UNREACHABLE_FILTER_FPR: f64 = 0.01;

const SAVE_INTERVAL: Duration = Duration::from_secs(60);

/// What the server loop knows about a peer. Workers only ever see the
/// endpoint; the record never crosses a thread boundary.
struct PeerRecord {
    last_contacted: Option<SystemTime>,
}

/// An object payload kept for re-serving on `getdata`, under the
/// command it arrived with.
struct StoredObject {
    command: Command,
    payload: Vec<u8>,
}

type StreamPeers = HashMap<u32, HashMap<Endpoint, PeerRecord>>;

pub struct Node {
    identity: Identity,
    cfg: Config,
    /// Peers that completed the handshake, per stream.
    connected: StreamPeers,
    /// Gossip candidates not yet connected, per stream. An endpoint is
    /// never in both maps for the same stream.
    known: StreamPeers,
    unreachable: BloomFilter,
    inventory: Inventory,
    objects: HashMap<ObjectHash, StoredObject>,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
}

impl Node {
    pub fn new(port: u16) -> Node {
        Node::with_config(Config::open(port), Identity::generate(port))
    }

    fn with_config(cfg: Config, identity: Identity) -> Node {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Node {
            identity,
            cfg,
            connected: HashMap::new(),
            known: HashMap::new(),
            unreachable: BloomFilter::new(UNREACHABLE_FILTER_ITEMS, UNREACHABLE_FILTER_FPR),
            inventory: Inventory::new(),
            objects: HashMap::new(),
            events_tx,
            events_rx,
        }
    }

    /// Binds the listener, bootstraps, and runs the event loop forever.
    pub fn run(mut self) -> io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.identity.port))?;
        info!(addr = %listener.local_addr()?, "listening");
        {
            let identity = self.identity.clone();
            let events = self.events_tx.clone();
            thread::spawn(move || accept_loop(listener, identity, events));
        }

        self.bootstrap();

        let events = self.events_rx.clone();
        let save_tick = tick(SAVE_INTERVAL);
        loop {
            select! {
                recv(events) -> event => match event {
                    Ok(event) => self.handle_event(event),
                    Err(_) => break,
                },
                recv(save_tick) -> _ => {
                    let endpoints = self.connected_endpoints();
                    if let Err(err) = self.cfg.save(endpoints) {
                        warn!(%err, "config save failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// Queues a handshake for every persisted peer and every resolved
    /// bootstrap seed. Neither path consults the unreachability filter.
    fn bootstrap(&mut self) {
        let configured = self.cfg.nodes.clone();
        for endpoint in configured {
            self.dispatch_handshake(endpoint, None);
        }
        for endpoint in boot::resolve_bootstrap_peers() {
            self.dispatch_handshake(endpoint, None);
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Addrs(addrs) => {
                debug!(count = addrs.len(), "gossip addresses received");
                for endpoint in self.accept_candidates(addrs) {
                    self.dispatch_handshake(endpoint, None);
                }
            }
            Event::Added(endpoint, stream) => self.handle_added(endpoint, stream),
            Event::Removed(endpoint, stream) => {
                if let Some((promoted, last_contacted)) = self.handle_removed(endpoint, stream) {
                    self.dispatch_handshake(promoted, last_contacted);
                }
            }
            Event::Inv {
                from,
                hashes,
                mut reply,
            } => {
                if let Err(err) = self.handle_inv(from, hashes, &mut reply) {
                    warn!(%from, %err, "getdata request failed");
                }
            }
            Event::GetData { hashes, mut reply } => {
                if let Err(err) = self.handle_getdata(&hashes, &mut reply) {
                    warn!(%err, "object delivery failed");
                }
            }
            Event::Msg { msg, raw } => {
                info!(
                    stream = msg.stream,
                    size = msg.encrypted.len(),
                    "message object received"
                );
                self.store_object(Command::Msg, raw);
            }
            Event::Broadcast { broadcast, raw } => {
                info!(stream = broadcast.stream, "broadcast object received");
                self.store_object(Command::Broadcast, raw);
            }
        }
    }

    /// Decides what to do with gossiped candidates: returns the
    /// endpoints to dial now (at most the connection deficit on the main
    /// stream) and files the remainder under `known`. Candidates already
    /// connected or known-unreachable are skipped.
    fn accept_candidates(&mut self, addrs: Vec<ExtendedNetworkAddress>) -> Vec<Endpoint> {
        let needed = TARGET_CONNECTED_PEERS.saturating_sub(self.stream_peer_count(STREAM_ONE));
        let mut dials = Vec::new();
        for addr in addrs {
            if addr.stream != STREAM_ONE {
                continue;
            }
            let endpoint = addr.endpoint();
            if self
                .connected
                .get(&addr.stream)
                .is_some_and(|peers| peers.contains_key(&endpoint))
            {
                continue;
            }
            if self.unreachable.contains(&endpoint.ip) {
                continue;
            }
            if dials.len() < needed {
                dials.push(endpoint);
            } else {
                self.known
                    .entry(addr.stream)
                    .or_default()
                    .insert(endpoint, PeerRecord { last_contacted: None });
            }
        }
        dials
    }

    fn handle_added(&mut self, endpoint: Endpoint, stream: u32) {
        if let Some(known) = self.known.get_mut(&stream) {
            known.remove(&endpoint);
        }
        self.connected.entry(stream).or_default().insert(
            endpoint,
            PeerRecord {
                last_contacted: Some(SystemTime::now()),
            },
        );
        info!(%endpoint, stream, "peer established");
    }

    /// Drops the peer, marks its IP unreachable, and when the main
    /// stream is under target hands back one `known` candidate to dial.
    fn handle_removed(
        &mut self,
        endpoint: Endpoint,
        stream: u32,
    ) -> Option<(Endpoint, Option<SystemTime>)> {
        if let Some(peers) = self.connected.get_mut(&stream) {
            peers.remove(&endpoint);
        }
        self.unreachable.insert(&endpoint.ip);
        debug!(%endpoint, stream, "peer removed");

        if self.stream_peer_count(STREAM_ONE) >= TARGET_CONNECTED_PEERS {
            return None;
        }
        let known = self.known.get_mut(&STREAM_ONE)?;
        let promoted = *known.keys().next()?;
        let record = known.remove(&promoted)?;
        debug!(endpoint = %promoted, "promoting known peer");
        Some((promoted, record.last_contacted))
    }

    /// Files the advertised hashes and requests every one we had never
    /// seen before in a single `getdata` on the advertising peer's
    /// transport.
    fn handle_inv<W: Write>(
        &mut self,
        from: Endpoint,
        hashes: Vec<ObjectHash>,
        reply: &mut W,
    ) -> Result<(), WireError> {
        let mut wanted = Vec::new();
        for hash in hashes {
            if self.inventory.add(hash, from) {
                wanted.push(hash);
            }
        }
        if wanted.is_empty() {
            return Ok(());
        }
        debug!(%from, count = wanted.len(), "requesting unseen objects");
        let payload = encode::build_inventory_payload(&wanted)?;
        send_message(reply, Command::GetData.name(), &payload)
    }

    /// Sends back every requested object we hold, each under the
    /// command it originally arrived with.
    fn handle_getdata<W: Write>(
        &mut self,
        hashes: &[ObjectHash],
        reply: &mut W,
    ) -> Result<(), WireError> {
        for hash in hashes {
            if let Some(object) = self.objects.get(hash) {
                send_message(reply, object.command.name(), &object.payload)?;
            }
        }
        Ok(())
    }

    fn store_object(&mut self, command: Command, raw: Vec<u8>) {
        let Some((nonce, body)) = raw.split_first_chunk::<8>() else {
            return;
        };
        let hash = crate::pow::object_hash(nonce, body);
        debug!(hash = %hex::encode(hash), size = raw.len(), "stored object");
        self.objects.insert(hash, StoredObject { command, payload: raw });
    }

    fn dispatch_handshake(&self, endpoint: Endpoint, last_contacted: Option<SystemTime>) {
        debug!(%endpoint, "handshaking");
        let identity = self.identity.clone();
        let events = self.events_tx.clone();
        thread::spawn(move || Peer::connect(endpoint, last_contacted, identity, events));
    }

    fn stream_peer_count(&self, stream: u32) -> usize {
        self.connected.get(&stream).map_or(0, HashMap::len)
    }

    fn connected_endpoints(&self) -> Vec<Endpoint> {
        self.connected
            .values()
            .flat_map(|peers| peers.keys().copied())
            .collect()
    }
}

fn accept_loop(listener: TcpListener, identity: Identity, events: Sender<Event>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let identity = identity.clone();
                let events = events.clone();
                thread::spawn(move || Peer::accept(stream, identity, events));
            }
            Err(err) => warn!(%err, "accept failed"),
        }
    }
}
