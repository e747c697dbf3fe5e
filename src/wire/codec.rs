use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use sha2::{Digest, Sha512};

use crate::wire::constants::{COMMAND_LENGTH, MAGIC_BYTES, MAX_PAYLOAD_LENGTH};
use crate::wire::error::WireError;
use crate::wire::message::RawMessage;

/// First 4 bytes of SHA-512 of the payload, as a big-endian integer.
pub fn checksum(payload: &[u8]) -> u32 {
    let digest = Sha512::digest(payload);
    BigEndian::read_u32(&digest[..4])
}

/// Writes a complete BitMessage frame to the given writer.
///
/// ```text
/// +-----------+--------------+----------------+--------------+
/// | magic (4) | command (12) | length (4, BE) | checksum (4) |
/// +-----------+--------------+----------------+--------------+
/// | payload (variable)                                   ... |
/// +----------------------------------------------------------+
/// ```
///
/// The command is an ASCII string of at most 12 bytes, NUL-padded on the
/// wire. The checksum is the first 4 bytes of `SHA512(payload)`.
///
/// # Example
///
/// ```
/// use bitz_network::wire;
///
/// let mut buffer = Vec::new();
/// wire::send_message(&mut buffer, "verack", &[]).unwrap();
/// assert_eq!(buffer.len(), 24);
/// ```
pub fn send_message<W: Write>(
    writer: &mut W,
    command: &str,
    payload: &[u8],
) -> Result<(), WireError> {
    if payload.len() > MAX_PAYLOAD_LENGTH as usize {
        return Err(WireError::OversizedPayload(payload.len() as u32));
    }
    writer.write_all(&MAGIC_BYTES)?;
    writer.write_all(&pad_command(command)?)?;
    writer.write_u32::<BigEndian>(payload.len() as u32)?;
    writer.write_u32::<BigEndian>(checksum(payload))?;
    writer.write_all(payload)?;
    Ok(())
}

/// Reads one BitMessage frame from any [`Read`] source.
///
/// The first bytes are not necessarily the beginning of a message: the
/// TCP stream can be in an unknown state, so the reader scans forward
/// until it finds the 4-byte magic sequence. The scan keeps a running
/// match counter; a mismatching byte resets it to 0, or to 1 when the
/// byte could itself start the sequence.
///
/// After the magic, the remaining 20 header bytes (command, length,
/// checksum) and then the payload are read exactly. Fails with
/// [`WireError::OversizedPayload`] if the advertised length is over the
/// cap, [`WireError::ShortRead`] if the stream ends early, and
/// [`WireError::ChecksumMismatch`] if the payload hash disagrees with
/// the header.
pub fn read_message<R: Read>(reader: &mut R) -> Result<RawMessage, WireError> {
    seek_magic(reader)?;

    let mut header = [0u8; COMMAND_LENGTH + 8];
    read_exact(reader, &mut header)?;

    let command = parse_command(&header[..COMMAND_LENGTH])?;
    let length = BigEndian::read_u32(&header[COMMAND_LENGTH..COMMAND_LENGTH + 4]);
    if length > MAX_PAYLOAD_LENGTH {
        return Err(WireError::OversizedPayload(length));
    }
    let advertised = BigEndian::read_u32(&header[COMMAND_LENGTH + 4..]);

    let mut payload = vec![0u8; length as usize];
    read_exact(reader, &mut payload)?;

    let calculated = checksum(&payload);
    if advertised != calculated {
        return Err(WireError::ChecksumMismatch {
            advertised,
            calculated,
        });
    }

    Ok(RawMessage { command, payload })
}

/// Consumes bytes until the full magic sequence has been matched.
fn seek_magic<R: Read>(reader: &mut R) -> Result<(), WireError> {
    let mut matched = 0;
    let mut byte = [0u8; 1];
    while matched < MAGIC_BYTES.len() {
        read_exact(reader, &mut byte)?;
        if byte[0] == MAGIC_BYTES[matched] {
            matched += 1;
        } else if byte[0] == MAGIC_BYTES[0] {
            matched = 1;
        } else {
            matched = 0;
        }
    }
    Ok(())
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), WireError> {
    reader.read_exact(buf).map_err(WireError::from_read)
}

fn pad_command(command: &str) -> Result<[u8; COMMAND_LENGTH], WireError> {
    let bytes = command.as_bytes();
    if bytes.len() > COMMAND_LENGTH || !command.is_ascii() {
        return Err(WireError::InvalidCommand(command.to_owned()));
    }
    let mut padded = [0u8; COMMAND_LENGTH];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

/// Trims trailing NULs off the 12-byte command field.
fn parse_command(bytes: &[u8]) -> Result<String, WireError> {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    std::str::from_utf8(&bytes[..end])
        .map(str::to_owned)
        .map_err(|_| WireError::Decode("command"))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use std::io::Cursor;

    use super::*;

    /// Builds a full frame without going through `send_message`, so the
    /// advertised checksum can be controlled independently.
    fn build_frame(command: &[u8], check: u32, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![];
        bytes.extend_from_slice(&MAGIC_BYTES);
        let mut cmd = [0u8; 12];
        cmd[..command.len()].copy_from_slice(command);
        bytes.extend_from_slice(&cmd);
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&check.to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    /// The 45-byte `msg` payload from a pcap capture of the reference
    /// client. Nonce, u32 time, stream varint, 32 bytes of ciphertext.
    fn pcap_msg_payload() -> Vec<u8> {
        let mut p = vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x14, 0x6B, 0x2A];
        p.extend_from_slice(&[0x51, 0x7A, 0x4C, 0xC7]);
        p.push(0x01);
        p.extend_from_slice(&[
            0x1F, 0x54, 0x9C, 0x27, 0x5E, 0x23, 0x96, 0x2C, 0x61, 0x09, 0xC0, 0xFB, 0xDB, 0x45,
            0x4B, 0x7D, 0x63, 0xE9, 0x77, 0xA0, 0x3B, 0xAA, 0x8A, 0x67, 0x34, 0x8A, 0xA4, 0x9C,
            0x09, 0xA1, 0xC7, 0xCB,
        ]);
        p
    }

    #[test]
    fn read_fake_frame() {
        let frame = build_frame(b"fake", 0x50540BC4, &[1, 2, 3, 4, 5]);
        let raw = read_message(&mut Cursor::new(frame)).unwrap();
        assert_eq!(raw.command, "fake");
        assert_eq!(raw.payload, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn read_pcap_msg_frame() {
        let frame = build_frame(b"msg", 0x18E55130, &pcap_msg_payload());
        let raw = read_message(&mut Cursor::new(frame)).unwrap();
        assert_eq!(raw.command, "msg");
        assert_eq!(raw.payload, pcap_msg_payload());
    }

    #[test]
    fn read_logged_version_frame() {
        // A version announcement captured from the reference client's
        // logs: 103-byte payload, checksum 9b dc bd 61.
        let mut payload = vec![];
        payload.extend_from_slice(&1i32.to_be_bytes());
        payload.extend_from_slice(&1u64.to_be_bytes());
        payload.extend_from_slice(&0x5171_740Ci64.to_be_bytes());
        payload.extend_from_slice(&1u64.to_be_bytes()); // addr_recv services
        payload.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF, 192, 168, 11, 13]);
        payload.extend_from_slice(&9090u16.to_be_bytes());
        payload.extend_from_slice(&1u64.to_be_bytes()); // addr_from services
        payload.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF, 127, 0, 0, 1]);
        payload.extend_from_slice(&8444u16.to_be_bytes());
        payload.extend_from_slice(&0x04D9_DC41_D6FD_96D3u64.to_be_bytes());
        payload.push(20);
        payload.extend_from_slice(b"/PyBitmessage:0.2.8/");
        payload.extend_from_slice(&[0x01, 0x01]);
        assert_eq!(payload.len(), 103);

        let frame = build_frame(b"version", 0x9BDCBD61, &payload);
        let raw = read_message(&mut Cursor::new(frame)).unwrap();
        assert_eq!(raw.command, "version");
        assert_eq!(raw.payload, payload);
    }

    #[test]
    fn bad_checksum_reports_both_values() {
        let frame = build_frame(b"badcheck", 0x50540BFF, &[1, 2, 3, 4, 5]);
        let err = read_message(&mut Cursor::new(frame)).unwrap_err();
        match err {
            WireError::ChecksumMismatch {
                advertised,
                calculated,
            } => {
                assert_eq!(advertised, 0x50540BFF);
                assert_eq!(calculated, 0x50540BC4);
            }
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
        // The formatted error carries the hex values the way the header
        // carried them.
        let frame = build_frame(b"badcheck", 0x50540BFF, &[1, 2, 3, 4, 5]);
        let message = read_message(&mut Cursor::new(frame)).unwrap_err().to_string();
        assert!(message.contains("50540bff"), "{message}");
        assert!(message.contains("50540bc4"), "{message}");
    }

    #[test]
    fn resynchronizes_past_leading_garbage() {
        let mut stream = b"AAAA".to_vec();
        stream.extend(build_frame(b"fake", 0x50540BC4, &[1, 2, 3, 4, 5]));
        let raw = read_message(&mut Cursor::new(stream)).unwrap();
        assert_eq!(raw.command, "fake");
        assert_eq!(raw.payload, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn resynchronizes_after_partial_magic() {
        // A stray leading first-magic-byte makes the real magic start on
        // a mismatching byte; the match must restart at 1, not 0, or the
        // frame is lost.
        let mut stream = vec![0xE9];
        stream.extend(build_frame(b"fake", 0x50540BC4, &[1, 2, 3, 4, 5]));
        let raw = read_message(&mut Cursor::new(stream)).unwrap();
        assert_eq!(raw.command, "fake");
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut bytes = vec![];
        bytes.extend_from_slice(&MAGIC_BYTES);
        bytes.extend_from_slice(b"msg\0\0\0\0\0\0\0\0\0");
        bytes.extend_from_slice(&(MAX_PAYLOAD_LENGTH + 1).to_be_bytes());
        bytes.extend_from_slice(&[0u8; 4]);
        let err = read_message(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, WireError::OversizedPayload(_)));
    }

    #[test]
    fn truncated_payload_is_a_short_read() {
        let mut frame = build_frame(b"fake", 0x50540BC4, &[1, 2, 3, 4, 5]);
        frame.truncate(frame.len() - 2);
        let err = read_message(&mut Cursor::new(frame)).unwrap_err();
        assert!(matches!(err, WireError::ShortRead));
    }

    #[test]
    fn write_then_read_round_trips() {
        for (command, payload) in [
            ("version", b"\x01\x02\x03".to_vec()),
            ("verack", vec![]),
            ("fake", vec![1, 2, 3, 4, 5]),
        ] {
            let mut buffer = Vec::new();
            send_message(&mut buffer, command, &payload).unwrap();
            let raw = read_message(&mut Cursor::new(buffer)).unwrap();
            assert_eq!(raw.command, command);
            assert_eq!(raw.payload, payload);
        }
    }

    #[test]
    fn overlong_command_is_rejected_on_send() {
        let mut buffer = Vec::new();
        let err = send_message(&mut buffer, "thirteenchars", &[]).unwrap_err();
        assert!(matches!(err, WireError::InvalidCommand(_)));
    }

    proptest! {
        #[test]
        fn round_trip_any_message(
            command in "[a-z]{1,12}",
            payload in proptest::collection::vec(any::<u8>(), 0..65536),
        ) {
            let mut buffer = Vec::new();
            send_message(&mut buffer, &command, &payload).unwrap();
            let raw = read_message(&mut Cursor::new(buffer)).unwrap();
            prop_assert_eq!(raw.command, command);
            prop_assert_eq!(raw.payload, payload);
        }
    }
}
