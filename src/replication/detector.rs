//! Change Detection
//!
//! Decides whether freshly retrieved artifact bytes are new content.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of an artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactFingerprint(String);

impl ArtifactFingerprint {
    /// Fingerprint the given bytes
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of [`ChangeDetector::evaluate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// New content; the stored fingerprint now matches it
    Changed,
    /// Same content as last accepted
    Unchanged,
}

/// Remembers the fingerprint of the last accepted artifact.
///
/// Held in memory only, so a restarted node treats its next artifact as new.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last: Option<ArtifactFingerprint>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `bytes` with the last accepted artifact.
    ///
    /// The `Unchanged` path performs no mutation, so duplicate triggers are
    /// harmless.
    pub fn evaluate(&mut self, bytes: &[u8]) -> Decision {
        let fingerprint = ArtifactFingerprint::of(bytes);
        if self.last.as_ref() == Some(&fingerprint) {
            tracing::info!("No changes detected in artifact ({})", fingerprint);
            return Decision::Unchanged;
        }

        tracing::info!("New artifact detected ({})", fingerprint);
        self.last = Some(fingerprint);
        Decision::Changed
    }

    /// Fingerprint of the last accepted artifact
    pub fn fingerprint(&self) -> Option<&ArtifactFingerprint> {
        self.last.as_ref()
    }

    /// Put back an earlier fingerprint after the accepted artifact could not
    /// be delivered, so the same bytes count as new again.
    pub fn restore(&mut self, previous: Option<ArtifactFingerprint>) {
        self.last = previous;
    }
}
