//! Replication Module
//!
//! Moves accepted artifacts from the leader to every follower.

pub mod protocol;
pub mod detector;
mod broadcaster;
mod receiver;

pub use protocol::ReplicationMessage;
pub use detector::{ArtifactFingerprint, ChangeDetector, Decision};
pub use broadcaster::ReplicationBroadcaster;
pub use receiver::{ReceiveOutcome, ReplicationReceiver};
