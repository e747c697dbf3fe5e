//! BitMessage wire protocol primitives.
//!
//! This module provides the low-level pieces for talking to BitMessage
//! peers over a byte stream:
//!
//! - Framing of the 24-byte message header, including resynchronization
//!   on the magic sequence when the stream state is unknown
//! - The big-endian field codecs (varint, varstring, network addresses,
//!   inventory vectors)
//! - Strongly typed payloads via the [`decode::Decode`] trait
//!
//! All multi-byte integers on this wire are big-endian, including the
//! multi-byte varint branches. That is the defining difference from the
//! bitcoin encoding this format otherwise resembles.
//!
//! Protocol reference:
//! https://bitmessage.org/wiki/Protocol_specification

pub mod codec;
pub mod constants;
pub mod decode;
pub mod encode;
pub mod error;
pub mod message;

pub use codec::{read_message, send_message};
pub use error::WireError;
pub use message::{Command, Endpoint, RawMessage};
