use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use termhub_protocol::DiagnosticsDto;

/// Counters for races and rejections that are handled internally and never
/// surfaced to clients.
#[derive(Debug, Default)]
pub struct DaemonMetrics {
    resize_applied: AtomicU64,
    resize_superseded: AtomicU64,
    resize_unchanged: AtomicU64,
    resize_suppressed: AtomicU64,
    not_owner_rejections: AtomicU64,
    duplicate_spawns_suppressed: AtomicU64,
    spawn_timeouts: AtomicU64,
}

impl DaemonMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_resize_applied(&self) {
        self.resize_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// A pending resize was replaced inside the quiet window.
    pub fn record_resize_superseded(&self) {
        self.resize_superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resize_unchanged(&self) {
        self.resize_unchanged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resize_suppressed(&self) {
        self.resize_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_owner(&self) {
        self.not_owner_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_spawn(&self) {
        self.duplicate_spawns_suppressed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spawn_timeout(&self) {
        self.spawn_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resize_applied(&self) -> u64 {
        self.resize_applied.load(Ordering::Relaxed)
    }

    pub fn resize_superseded(&self) -> u64 {
        self.resize_superseded.load(Ordering::Relaxed)
    }

    pub fn not_owner_rejections(&self) -> u64 {
        self.not_owner_rejections.load(Ordering::Relaxed)
    }

    pub fn duplicate_spawns_suppressed(&self) -> u64 {
        self.duplicate_spawns_suppressed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DiagnosticsDto {
        DiagnosticsDto {
            resize_applied: self.resize_applied.load(Ordering::Relaxed),
            resize_superseded: self.resize_superseded.load(Ordering::Relaxed),
            resize_unchanged: self.resize_unchanged.load(Ordering::Relaxed),
            resize_suppressed: self.resize_suppressed.load(Ordering::Relaxed),
            not_owner_rejections: self.not_owner_rejections.load(Ordering::Relaxed),
            duplicate_spawns_suppressed: self.duplicate_spawns_suppressed.load(Ordering::Relaxed),
            spawn_timeouts: self.spawn_timeouts.load(Ordering::Relaxed),
            poison_recoveries: termhub_common::poison_recovery_count(),
        }
    }
}
