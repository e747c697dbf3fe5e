//! Synchronous client session for poking at a single remote node.
//!
//! This is the interactive counterpart of the peer worker: no channels,
//! no server loop, just a blocking handshake and send/recv on one
//! connection. The probe binary is its only consumer.

use std::error::Error;
use std::net::{TcpStream, ToSocketAddrs};

use crate::peer::{Identity, CONNECTION_TIMEOUT};
use crate::wire::codec::{read_message, send_message};
use crate::wire::decode::Decode;
use crate::wire::encode;
use crate::wire::message::{Command, Endpoint, RawMessage, VersionMessage};

pub struct Session {
    stream: TcpStream,
    identity: Identity,
}

impl Session {
    /// Resolves `node` (a `host:port` string) and connects with the
    /// usual socket deadlines applied.
    pub fn connect(node: &str, identity: Identity) -> Result<Session, Box<dyn Error>> {
        let addr = node
            .to_socket_addrs()?
            .next()
            .ok_or("could not resolve address")?;
        let stream = TcpStream::connect_timeout(&addr, CONNECTION_TIMEOUT)?;
        stream.set_read_timeout(Some(CONNECTION_TIMEOUT))?;
        stream.set_write_timeout(Some(CONNECTION_TIMEOUT))?;
        Ok(Session { stream, identity })
    }

    /// Drives the version/verack exchange to completion.
    pub fn handshake(&mut self) -> Result<(), Box<dyn Error>> {
        let endpoint = Endpoint::from_socket_addr(self.stream.peer_addr()?);
        let payload = encode::build_version_payload(
            Some(endpoint),
            self.identity.port,
            self.identity.nonce,
            &self.identity.user_agent,
            &self.identity.streams,
        );
        send_message(&mut self.stream, Command::Version.name(), &payload)?;

        let mut got_version = false;
        let mut got_verack = false;

        while !(got_version && got_verack) {
            let raw = read_message(&mut self.stream)?;
            match Command::from_name(&raw.command) {
                Command::Version => {
                    let version = VersionMessage::decode(&raw.payload)?;
                    println!(
                        "peer is {} speaking protocol {}",
                        version.user_agent, version.version
                    );
                    got_version = true;
                    send_message(&mut self.stream, Command::Verack.name(), &[])?;
                }
                Command::Verack => {
                    got_verack = true;
                }
                _ => {}
            }
        }

        Ok(())
    }

    pub fn send(&mut self, command: &str, payload: &[u8]) -> Result<(), Box<dyn Error>> {
        send_message(&mut self.stream, command, payload)?;
        Ok(())
    }

    pub fn recv(&mut self) -> Result<RawMessage, Box<dyn Error>> {
        Ok(read_message(&mut self.stream)?)
    }
}
