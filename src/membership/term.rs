//! Leadership Terms
//!
//! A leader's term is the id of the view it currently leads. View ids are
//! numbered by the substrate, so every member that installed a view agrees
//! on its term. Broadcasts carry the sender's term, and followers reject
//! payloads from terms older than the highest they have observed.

use std::sync::atomic::{AtomicU64, Ordering};

/// Result of checking an inbound term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermCheck {
    /// Term is at least as new as anything seen
    Current,
    /// Term is older than the highest term seen
    Stale { highest: u64 },
}

/// Tracks this node's own term and the highest term observed
#[derive(Debug, Default)]
pub struct TermTracker {
    /// Term this node leads under (0 = never led)
    current: AtomicU64,
    /// Highest term seen anywhere, including our own
    highest: AtomicU64,
}

impl TermTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Term this node holds as leader
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest term observed
    pub fn highest(&self) -> u64 {
        self.highest.load(Ordering::SeqCst)
    }

    /// Lead under the id of the view we are coordinator of. Never goes back.
    pub fn lead(&self, view_id: u64) -> u64 {
        let term = self.current.fetch_max(view_id, Ordering::SeqCst).max(view_id);
        self.highest.fetch_max(term, Ordering::SeqCst);
        term
    }

    /// Record an inbound term and classify it
    pub fn observe(&self, term: u64) -> TermCheck {
        let previous = self.highest.fetch_max(term, Ordering::SeqCst);
        if term >= previous {
            TermCheck::Current
        } else {
            TermCheck::Stale { highest: previous }
        }
    }
}
