//! Epoch-scoped dedup state

use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Scanning generation, advanced on every navigation reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ScanEpoch(pub u64);

impl std::fmt::Display for ScanEpoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "epoch#{}", self.0)
    }
}

/// Fingerprints claimed in the current epoch. Grows monotonically until
/// the epoch advances; there is no eviction.
#[derive(Debug, Default)]
pub struct ProcessedSet {
    claimed: HashSet<Fingerprint>,
    epoch: ScanEpoch,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a fingerprint for dispatch. Returns false when it was already
    /// claimed in this epoch.
    pub fn claim(&mut self, fingerprint: &Fingerprint) -> bool {
        if self.claimed.contains(fingerprint) {
            return false;
        }
        self.claimed.insert(fingerprint.clone());
        true
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.claimed.contains(fingerprint)
    }

    pub fn epoch(&self) -> ScanEpoch {
        self.epoch
    }

    pub fn is_current(&self, epoch: ScanEpoch) -> bool {
        self.epoch == epoch
    }

    /// Clear every claim and move to the next epoch in one step
    pub fn advance(&mut self) -> ScanEpoch {
        self.claimed.clear();
        self.epoch = ScanEpoch(self.epoch.0.wrapping_add(1));
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

/// Processed set shared by the scanner, the navigation watcher and
/// in-flight dispatches. Critical sections never span an await.
#[derive(Debug, Default)]
pub struct SharedProcessedSet(Arc<Mutex<ProcessedSet>>);

impl SharedProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProcessedSet> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn claim(&self, fingerprint: &Fingerprint) -> bool {
        self.lock().claim(fingerprint)
    }

    /// Claim and report the epoch the claim belongs to, under one lock
    pub fn claim_in_epoch(&self, fingerprint: &Fingerprint) -> Option<ScanEpoch> {
        let mut set = self.lock();
        set.claim(fingerprint).then(|| set.epoch())
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.lock().contains(fingerprint)
    }

    pub fn epoch(&self) -> ScanEpoch {
        self.lock().epoch()
    }

    pub fn is_current(&self, epoch: ScanEpoch) -> bool {
        self.lock().is_current(epoch)
    }

    pub fn advance(&self) -> ScanEpoch {
        self.lock().advance()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Clone for SharedProcessedSet {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}
