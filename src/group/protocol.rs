//! Group Wire Protocol
//!
//! Frames exchanged by the TCP group transport: membership heartbeats,
//! departures, and broadcast payloads.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest frame body accepted from the wire
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Frames exchanged between group members
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GroupFrame {
    /// Liveness announcement, sent every heartbeat interval
    Heartbeat {
        group: String,
        member: String,
        address: String,
        /// Join timestamp (ms since epoch), used for view ordering
        joined_at: i64,
        /// Id of the sender's current view
        view_id: u64,
        /// Addresses this member knows about
        known: Vec<String>,
    },

    /// Graceful departure
    Leave {
        group: String,
        member: String,
    },

    /// Broadcast payload
    Data {
        group: String,
        sender: String,
        payload: Vec<u8>,
    },
}

impl GroupFrame {
    /// Serialize frame to bytes
    pub fn serialize(&self) -> std::result::Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize frame from bytes
    pub fn deserialize(bytes: &[u8]) -> std::result::Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Group this frame belongs to
    pub fn group(&self) -> &str {
        match self {
            GroupFrame::Heartbeat { group, .. }
            | GroupFrame::Leave { group, .. }
            | GroupFrame::Data { group, .. } => group,
        }
    }

    /// Get the frame type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            GroupFrame::Heartbeat { .. } => "Heartbeat",
            GroupFrame::Leave { .. } => "Leave",
            GroupFrame::Data { .. } => "Data",
        }
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Body length
    pub length: u32,
    /// Body checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let [l0, l1, l2, l3, c0, c1, c2, c3] = *bytes;
        Self {
            length: u32::from_le_bytes([l0, l1, l2, l3]),
            checksum: u32::from_le_bytes([c0, c1, c2, c3]),
        }
    }
}

/// Read a framed message from a reader
pub async fn read_frame<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<GroupFrame> {
    use tokio::io::AsyncReadExt;

    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    if header.length > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!("Frame of {} bytes exceeds limit", header.length)));
    }

    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    if crc32fast::hash(&body) != header.checksum {
        return Err(Error::Protocol("Frame checksum mismatch".into()));
    }

    Ok(GroupFrame::deserialize(&body)?)
}

/// Write a framed message to a writer
pub async fn write_frame<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &GroupFrame,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let body = frame.serialize()?;
    let header = FrameHeader::new(&body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let frame = GroupFrame::Data {
            group: "g".into(),
            sender: "node-1".into(),
            payload: b"#EXTM3U\n#EXT-X-VERSION:3\n".to_vec(),
        };

        write_frame(&mut client, &frame).await.unwrap();
        match read_frame(&mut server).await.unwrap() {
            GroupFrame::Data { group, sender, payload } => {
                assert_eq!(group, "g");
                assert_eq!(sender, "node-1");
                assert!(payload.starts_with(b"#EXTM3U"));
            }
            other => panic!("Wrong frame type: {}", other.type_name()),
        }
    }

    #[tokio::test]
    async fn test_corrupted_body_rejected() {
        use tokio::io::AsyncWriteExt;

        let frame = GroupFrame::Leave { group: "g".into(), member: "node-2".into() };
        let mut body = frame.serialize().unwrap();
        let header = FrameHeader::new(&body);
        body[0] ^= 0xFF;

        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&header.to_bytes()).await.unwrap();
        client.write_all(&body).await.unwrap();

        assert!(matches!(read_frame(&mut server).await, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_frame_header() {
        let data = b"test message data";
        let header = FrameHeader::new(data);
        let restored = FrameHeader::from_bytes(&header.to_bytes());

        assert_eq!(header.length, restored.length);
        assert_eq!(header.checksum, restored.checksum);
    }
}
