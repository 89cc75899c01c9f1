//! Membership Module
//!
//! Cluster membership and leadership for this process.

mod coordinator;
pub mod term;

pub use coordinator::{ChangeListener, Deliveries, MembershipCoordinator};
pub use term::{TermCheck, TermTracker};
