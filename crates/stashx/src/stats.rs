//! 📊 Pipeline counters. Relaxed atomics bumped from every thread, read as a snapshot.
//!
//! Nobody gates a decision on these. They exist so a human (or the CLI summary table)
//! can see where the documents went.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct PipelineStats {
    appended: AtomicU64,
    rejected: AtomicU64,
    formatted: AtomicU64,
    format_failures: AtomicU64,
    pushed_documents: AtomicU64,
    pushes: AtomicU64,
    failed_pushes: AtomicU64,
    dropped_documents: AtomicU64,
}

impl PipelineStats {
    pub(crate) fn appended(&self) {
        self.appended.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn formatted(&self) {
        self.formatted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn format_failed(&self) {
        self.format_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn pushed(&self, documents: usize) {
        self.pushes.fetch_add(1, Ordering::Relaxed);
        self.pushed_documents
            .fetch_add(documents as u64, Ordering::Relaxed);
    }

    pub(crate) fn push_failed(&self, documents: usize) {
        self.failed_pushes.fetch_add(1, Ordering::Relaxed);
        self.dropped_documents
            .fetch_add(documents as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            appended: self.appended.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            formatted: self.formatted.load(Ordering::Relaxed),
            format_failures: self.format_failures.load(Ordering::Relaxed),
            pushed_documents: self.pushed_documents.load(Ordering::Relaxed),
            pushes: self.pushes.load(Ordering::Relaxed),
            failed_pushes: self.failed_pushes.load(Ordering::Relaxed),
            dropped_documents: self.dropped_documents.load(Ordering::Relaxed),
        }
    }
}

/// 📸 A point-in-time copy of the counters. Fields are read one by one, so a snapshot
/// taken mid-flight can be off by the events that moved while it was taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// events accepted into the ring
    pub appended: u64,
    /// appends refused (not started, or already stopping)
    pub rejected: u64,
    pub formatted: u64,
    pub format_failures: u64,
    /// documents that made it into the store
    pub pushed_documents: u64,
    /// successful RPUSH round trips
    pub pushes: u64,
    pub failed_pushes: u64,
    /// documents lost with a failed push
    pub dropped_documents: u64,
}
