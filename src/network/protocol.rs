// Protocol - Wire messages and framing for the gossip overlay
// Principle: Newline-delimited minified JSON, hard size cap, silent drops

use crate::identity::ID_HEX_LEN;
use serde::{Deserialize, Serialize};

/// Maximum bytes per wire line; larger lines are discarded
pub const MAX_MESSAGE_SIZE: usize = 2048;

/// Maximum hops a message may have traveled and still be relayed
pub const MAX_RELAY_HOPS: u32 = 2;

/// Error type for protocol operations
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Parse failed: {0}")]
    ParseFailed(String),

    #[error("Invalid field: {0}")]
    InvalidField(&'static str),
}

/// Optional self-reported peer location (unauthenticated)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

/// Gossip messages. The signature covers exactly `"seq:" + decimal(seq)`;
/// hop count and location are unauthenticated by contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GossipMessage {
    #[serde(rename = "HEARTBEAT")]
    Heartbeat {
        id: String,
        seq: u64,
        hops: u32,
        nonce: u64,
        sig: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<Location>,
    },

    #[serde(rename = "LEAVE")]
    Leave { id: String, hops: u32 },
}

impl GossipMessage {
    /// Originating peer id
    pub fn id(&self) -> &str {
        match self {
            GossipMessage::Heartbeat { id, .. } => id,
            GossipMessage::Leave { id, .. } => id,
        }
    }

    /// Hops traveled so far
    pub fn hops(&self) -> u32 {
        match self {
            GossipMessage::Heartbeat { hops, .. } => *hops,
            GossipMessage::Leave { hops, .. } => *hops,
        }
    }

    /// Copy of this message with the hop counter advanced for relay
    pub fn bump_hops(&self) -> GossipMessage {
        let mut msg = self.clone();
        match &mut msg {
            GossipMessage::Heartbeat { hops, .. } => *hops += 1,
            GossipMessage::Leave { hops, .. } => *hops += 1,
        }
        msg
    }

    /// Decode one wire line. The caller has already stripped the newline.
    pub fn decode(line: &[u8]) -> Result<Self, ProtocolError> {
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let msg: GossipMessage = serde_json::from_slice(line)
            .map_err(|e| ProtocolError::ParseFailed(e.to_string()))?;
        msg.validate()?;
        Ok(msg)
    }

    /// Structural validation applied before any other processing
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let id = self.id();
        if id.len() != ID_HEX_LEN || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProtocolError::InvalidField("id"));
        }

        if let GossipMessage::Heartbeat { sig, loc, .. } = self {
            if sig.is_empty() || !sig.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ProtocolError::InvalidField("sig"));
            }
            if let Some(loc) = loc {
                if !loc.lat.is_finite() || !loc.lon.is_finite() {
                    return Err(ProtocolError::InvalidField("loc"));
                }
            }
        }

        Ok(())
    }

    /// Encode as one minified-JSON wire line, newline included
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| ProtocolError::ParseFailed(e.to_string()))?;
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: line.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        line.push('\n');
        Ok(line)
    }
}

// =============================================================================
// LINE ASSEMBLER
// =============================================================================

/// Splits a TCP byte stream into lines. A single read may carry zero, one,
/// or several messages plus a partial trailing line; partials are buffered
/// across reads. A line exceeding MAX_MESSAGE_SIZE is dropped in full,
/// including continuation bytes up to its terminating newline.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
    discarding: bool,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the complete lines it closed (newline
    /// stripped, empty lines skipped) and the number of oversize lines
    /// dropped.
    pub fn push(&mut self, chunk: &[u8]) -> (Vec<Vec<u8>>, u64) {
        let mut lines = Vec::new();
        let mut dropped = 0u64;

        for &b in chunk {
            if b == b'\n' {
                if self.discarding {
                    self.discarding = false;
                } else if !self.buf.is_empty() {
                    lines.push(std::mem::take(&mut self.buf));
                }
                continue;
            }
            if self.discarding {
                continue;
            }
            self.buf.push(b);
            if self.buf.len() > MAX_MESSAGE_SIZE {
                self.buf.clear();
                self.discarding = true;
                dropped += 1;
            }
        }

        (lines, dropped)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fake_id() -> String {
        "ab".repeat(ID_HEX_LEN / 2)
    }

    fn heartbeat() -> GossipMessage {
        GossipMessage::Heartbeat {
            id: fake_id(),
            seq: 5,
            hops: 0,
            nonce: 12345,
            sig: "aa".repeat(64),
            loc: None,
        }
    }

    #[test]
    fn test_heartbeat_roundtrip() {
        let msg = heartbeat();
        let line = msg.encode().unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.starts_with("{\"type\":\"HEARTBEAT\""));
        let decoded = GossipMessage::decode(line.trim_end().as_bytes()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_leave_roundtrip() {
        let msg = GossipMessage::Leave {
            id: fake_id(),
            hops: 1,
        };
        let line = msg.encode().unwrap();
        let decoded = GossipMessage::decode(line.trim_end().as_bytes()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_loc_omitted_when_absent() {
        let line = heartbeat().encode().unwrap();
        assert!(!line.contains("loc"));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let line = format!("{{\"type\":\"PING\",\"id\":\"{}\",\"hops\":0}}", fake_id());
        assert!(GossipMessage::decode(line.as_bytes()).is_err());
    }

    #[test]
    fn test_negative_seq_rejected() {
        let line = format!(
            "{{\"type\":\"HEARTBEAT\",\"id\":\"{}\",\"seq\":-1,\"hops\":0,\"nonce\":0,\"sig\":\"aa\"}}",
            fake_id()
        );
        assert!(GossipMessage::decode(line.as_bytes()).is_err());
    }

    #[test]
    fn test_bad_id_rejected() {
        let msg = GossipMessage::Leave {
            id: "zz".repeat(ID_HEX_LEN / 2),
            hops: 0,
        };
        assert!(msg.validate().is_err());

        let msg = GossipMessage::Leave {
            id: "abcd".into(),
            hops: 0,
        };
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_non_hex_sig_rejected() {
        let msg = GossipMessage::Heartbeat {
            id: fake_id(),
            seq: 1,
            hops: 0,
            nonce: 0,
            sig: "not-hex!".into(),
            loc: None,
        };
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_oversize_decode_rejected() {
        let big = vec![b'x'; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            GossipMessage::decode(&big),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_bump_hops() {
        let msg = heartbeat();
        assert_eq!(msg.bump_hops().hops(), 1);
        assert_eq!(msg.hops(), 0);
    }

    #[test]
    fn test_assembler_splits_multiple_lines() {
        let mut asm = LineAssembler::new();
        let (lines, dropped) = asm.push(b"one\ntwo\nthree\n");
        assert_eq!(
            lines,
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
        );
        assert_eq!(dropped, 0);
    }

    #[test]
    fn test_assembler_buffers_partials_across_reads() {
        let mut asm = LineAssembler::new();
        let (lines, _) = asm.push(b"hel");
        assert!(lines.is_empty());
        let (lines, _) = asm.push(b"lo\nwor");
        assert_eq!(lines, vec![b"hello".to_vec()]);
        let (lines, _) = asm.push(b"ld\n");
        assert_eq!(lines, vec![b"world".to_vec()]);
    }

    #[test]
    fn test_assembler_drops_oversize_line_and_recovers() {
        let mut asm = LineAssembler::new();
        let mut chunk = vec![b'x'; MAX_MESSAGE_SIZE + 10];
        chunk.push(b'\n');
        chunk.extend_from_slice(b"ok\n");

        let (lines, dropped) = asm.push(&chunk);
        assert_eq!(lines, vec![b"ok".to_vec()]);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_assembler_drops_oversize_spanning_reads() {
        let mut asm = LineAssembler::new();
        let (lines, dropped) = asm.push(&vec![b'a'; MAX_MESSAGE_SIZE]);
        assert!(lines.is_empty());
        assert_eq!(dropped, 0);

        // One more chunk tips it over; the rest of the line is swallowed
        let (lines, dropped) = asm.push(&vec![b'a'; 500]);
        assert!(lines.is_empty());
        assert_eq!(dropped, 1);

        let (lines, _) = asm.push(b"tail\nnext\n");
        assert_eq!(lines, vec![b"next".to_vec()]);
    }

    #[test]
    fn test_assembler_skips_empty_lines() {
        let mut asm = LineAssembler::new();
        let (lines, _) = asm.push(b"\n\na\n\n");
        assert_eq!(lines, vec![b"a".to_vec()]);
    }

    proptest! {
        // Arbitrary junk must never panic the decoder
        #[test]
        fn prop_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = GossipMessage::decode(&data);
        }

        // Reassembling a stream in arbitrary chunkings yields the same lines
        #[test]
        fn prop_assembler_chunking_invariant(cut in 1usize..30) {
            let stream = b"alpha\nbeta\ngamma\ndelta\n";
            let mut whole = LineAssembler::new();
            let (expected, _) = whole.push(stream);

            let mut pieces = LineAssembler::new();
            let mut got = Vec::new();
            for chunk in stream.chunks(cut) {
                got.extend(pieces.push(chunk).0);
            }
            prop_assert_eq!(got, expected);
        }
    }
}
