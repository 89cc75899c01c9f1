//! Group Communication Module
//!
//! The substrate every node joins: ordered membership views plus
//! broadcast of opaque payloads to the members of the current view.

mod local;
pub mod protocol;
mod tcp;

pub use local::{LocalGroupHub, LocalTransport};
pub use protocol::{FrameHeader, GroupFrame};
pub use tcp::{TcpGroup, TcpGroupConfig};

use std::sync::Arc;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// Member identifier within a group
pub type MemberId = String;

/// Ordered membership snapshot
///
/// Every live member receives the same views in the same order, so
/// position 0 names the same member everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupView {
    /// Monotonic view number as seen by this member
    pub view_id: u64,
    /// Members, oldest first
    pub members: Vec<MemberId>,
}

impl GroupView {
    /// Create a new view
    pub fn new(view_id: u64, members: Vec<MemberId>) -> Self {
        Self { view_id, members }
    }

    /// The member at position 0, if any
    pub fn coordinator(&self) -> Option<&MemberId> {
        self.members.first()
    }

    /// Whether the given member is part of this view
    pub fn contains(&self, member: &str) -> bool {
        self.members.iter().any(|m| m == member)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl std::fmt::Display for GroupView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}|{}]", self.view_id, self.members.join(", "))
    }
}

/// A payload delivered by the substrate
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Sending member
    pub sender: MemberId,
    /// Opaque payload
    pub payload: Bytes,
}

/// Outbound half of a joined channel
#[async_trait::async_trait]
pub trait GroupSender: Send + Sync {
    /// Broadcast a payload to every member of the current view
    async fn send(&self, payload: Bytes) -> Result<()>;

    /// Leave the group. Calling it again is a no-op.
    async fn leave(&self) -> Result<()>;
}

/// A connection to a named group
pub struct GroupChannel {
    /// Identity of this member within the group
    pub local: MemberId,
    /// View deliveries, serialized by the substrate
    pub views: mpsc::UnboundedReceiver<GroupView>,
    /// Payload deliveries, independent of view delivery
    pub messages: mpsc::UnboundedReceiver<Inbound>,
    /// Broadcast and leave
    pub sender: Arc<dyn GroupSender>,
}

/// A group-communication substrate
#[async_trait::async_trait]
pub trait GroupTransport: Send + Sync {
    /// Join the named group. Fails with `Error::Membership` if unreachable.
    async fn join(&self, group: &str) -> Result<GroupChannel>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_coordinator() {
        let view = GroupView::new(3, vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(view.coordinator().map(String::as_str), Some("a"));
        assert!(view.contains("c"));
        assert!(!view.contains("d"));
        assert_eq!(view.to_string(), "[3|a, b, c]");

        let empty = GroupView::new(0, Vec::new());
        assert!(empty.coordinator().is_none());
        assert!(empty.is_empty());
    }
}
