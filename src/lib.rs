//! A BitMessage network node.
//!
//! BitMessage is a decentralized, anonymous messaging overlay built on
//! gossip of signed, proof-of-work-stamped objects. This crate
//! implements the protocol engine: the binary framing codec, the
//! per-peer connection state machine, the central server loop that owns
//! the peer directories and object inventory, and the proof-of-work
//! algorithm.
//!
//! The moving parts:
//!
//! - [`wire`] frames and decodes protocol messages
//! - [`pow`] computes and verifies the hashcash-style proof of work
//! - [`peer`] runs one worker per connection and emits events
//! - [`server`] is the single-threaded coordinator those events feed
//! - [`inventory`], [`bloom`], [`config`] and [`boot`] hold the node's
//!   book-keeping: who has which object, who is unreachable, which
//!   peers to redial after a restart, and where to find the first ones
//!
//! Protocol reference:
//! https://bitmessage.org/wiki/Protocol_specification

pub mod bloom;
pub mod boot;
pub mod config;
pub mod inventory;
pub mod peer;
pub mod pow;
pub mod server;
pub mod session;
pub mod wire;
