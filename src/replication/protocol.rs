//! Replication Protocol
//!
//! Payload format carried inside group broadcasts.

use serde::{Deserialize, Serialize};

/// Artifact replication message, stamped with the sender's leadership term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationMessage {
    /// Term the sender held when it broadcast
    pub term: u64,
    /// Artifact bytes, verbatim
    pub artifact: Vec<u8>,
}

impl ReplicationMessage {
    /// Serialize message to bytes
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
