//! WolfCast - Leader-Coordinated Playlist Replication
//!
//! Keeps a single artifact (typically an HLS playlist) identical across
//! every node of a cluster. Nodes join a named group; the first member of
//! the current view is the leader. Only the leader consumes change
//! notifications, fetches the artifact from the object store, and
//! broadcasts it when its content has changed. Followers write each
//! broadcast to their local copy.
//!
//! # Architecture
//!
//! - `group`: the membership substrate (TCP heartbeats or in-process)
//! - `membership`: leader derivation, listeners, and terms
//! - `gate`: switches ingestion on and off with leadership
//! - `ingest`: notifications, fetching, change detection on the leader
//! - `replication`: broadcast and receipt of artifacts
//! - `storage`: atomic replacement of the local artifact file
//!
//! # Features
//!
//! - Deterministic leader from the agreed view, with automatic failover
//! - SHA-256 change detection, idempotent under redelivery
//! - Term-stamped broadcasts; stale leaders are ignored
//! - Bounded credential refresh against S3-compatible stores
//! - HTTP status API

pub mod config;
pub mod error;
pub mod group;
pub mod membership;
pub mod gate;
pub mod replication;
pub mod ingest;
pub mod storage;
pub mod node;
pub mod api;

pub use config::WolfCastConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfCastConfig;
    pub use crate::error::{Error, Result};
    pub use crate::gate::{GateState, LeadershipGate};
    pub use crate::group::{GroupTransport, GroupView, LocalGroupHub, TcpGroup};
    pub use crate::ingest::{ArtifactSource, IngestOutcome, TriggerSource};
    pub use crate::membership::MembershipCoordinator;
    pub use crate::node::{Node, NodeStatus};
    pub use crate::storage::ArtifactStore;
}
