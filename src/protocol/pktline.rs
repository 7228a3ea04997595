//! pkt-line framing: a 4-digit lowercase hex length (payload + 4) followed by
//! the payload. `0000` is a flush packet.

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::{GitError, Result};

/// Largest payload a single pkt-line can carry
pub const MAX_PAYLOAD: usize = 65516;

pub const FLUSH: &[u8] = b"0000";

/// Frame `payload` as one pkt-line
pub fn encode(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_PAYLOAD {
        return Err(GitError::invalid(format!(
            "pkt-line payload of {} bytes exceeds {}",
            payload.len(),
            MAX_PAYLOAD
        )));
    }
    let mut buf = BytesMut::with_capacity(payload.len() + 4);
    buf.put_slice(format!("{:04x}", payload.len() + 4).as_bytes());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// The preamble of an info/refs response: `# service=<name>\n` plus a flush
pub fn service_announcement(service: &str) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    buf.put(encode(format!("# service={}\n", service).as_bytes())?);
    buf.put_slice(FLUSH);
    Ok(buf.freeze())
}

/// One decoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet<'a> {
    Flush,
    /// `0001` in protocol v2
    Delimiter,
    /// `0002` in protocol v2
    ResponseEnd,
    Data(&'a [u8]),
}

/// Incremental reader over a buffer of pkt-lines
#[derive(Debug)]
pub struct PktLineReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PktLineReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed, e.g. the packfile after the command list
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// The next packet, or `Ok(None)` at end of input
    pub fn next_packet(&mut self) -> Result<Option<Packet<'a>>> {
        let rest = self.remaining();
        if rest.is_empty() {
            return Ok(None);
        }
        if rest.len() < 4 {
            return Err(GitError::invalid("Truncated pkt-line length"));
        }
        let len = std::str::from_utf8(&rest[..4])
            .ok()
            .and_then(|hex| usize::from_str_radix(hex, 16).ok())
            .ok_or_else(|| GitError::invalid("Invalid pkt-line length"))?;
        let packet = match len {
            0 => Packet::Flush,
            1 => Packet::Delimiter,
            2 => Packet::ResponseEnd,
            3 => return Err(GitError::invalid("Invalid pkt-line length")),
            _ => {
                if len - 4 > MAX_PAYLOAD {
                    return Err(GitError::invalid("pkt-line too long"));
                }
                if rest.len() < len {
                    return Err(GitError::invalid("Truncated pkt-line"));
                }
                Packet::Data(&rest[4..len])
            }
        };
        self.pos += match packet {
            Packet::Data(payload) => payload.len() + 4,
            _ => 4,
        };
        Ok(Some(packet))
    }

    /// Data packets up to (and consuming) the next flush
    pub fn read_until_flush(&mut self) -> Result<Vec<&'a [u8]>> {
        let mut lines = Vec::new();
        loop {
            match self.next_packet()? {
                Some(Packet::Data(payload)) => lines.push(payload),
                Some(Packet::Flush) => return Ok(lines),
                Some(_) => {}
                None => return Err(GitError::invalid("Missing flush packet")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_length_prefix() {
        assert_eq!(&encode(b"hello\n").unwrap()[..], b"000ahello\n");
        assert_eq!(&encode(b"").unwrap()[..], b"0004");
    }

    #[test]
    fn announcement_matches_git() {
        assert_eq!(
            &service_announcement("git-upload-pack").unwrap()[..],
            b"001e# service=git-upload-pack\n0000"
        );
        assert_eq!(
            &service_announcement("git-receive-pack").unwrap()[..],
            b"001f# service=git-receive-pack\n0000"
        );
    }

    #[test]
    fn rejects_oversized_payloads() {
        assert!(encode(&vec![b'x'; MAX_PAYLOAD]).is_ok());
        assert!(encode(&vec![b'x'; MAX_PAYLOAD + 1]).is_err());
    }

    #[test]
    fn reads_packets_and_leaves_the_rest() {
        let data = b"0008one\n0008two\n0000PACK....";
        let mut reader = PktLineReader::new(data);
        let lines = reader.read_until_flush().unwrap();
        assert_eq!(lines, vec![&b"one\n"[..], &b"two\n"[..]]);
        assert_eq!(reader.remaining(), b"PACK....");
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert!(PktLineReader::new(b"00").next_packet().is_err());
        assert!(PktLineReader::new(b"zzzz").next_packet().is_err());
        assert!(PktLineReader::new(b"0010short").next_packet().is_err());
        assert!(PktLineReader::new(b"0009one\n").read_until_flush().is_err());
    }
}
