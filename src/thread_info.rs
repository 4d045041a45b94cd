//! Per-thread registration state (spec §3 "Thread Info").
use crate::config::NS_MAX;
use std::convert::TryInto;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::time::Instant;

/// A plain (non-atomic) copy of one namespace's read-section state, taken
/// by [`LocalNamespace::snapshot`]. Used for `hung_lns`, which only the
/// worker thread ever reads or writes, so it doesn't need to be atomic
/// itself — only the live `lns` entry it is copied from does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LnsSnapshot {
    pub version: u64,
    pub counter: i32,
}

/// `{version, counter}` — a thread's view of one namespace (spec §3).
/// `counter` is the nesting depth of read sections this thread currently
/// holds open in that namespace; `version` is the namespace version
/// observed when the outermost section was entered.
///
/// Both fields are atomic: the owning thread writes them from
/// [`Namespace::read_lock`](crate::namespace::Namespace::read_lock)/
/// [`read_unlock`](crate::namespace::Namespace::read_unlock) on the reader
/// fast path, while the worker thread concurrently reads them every pass
/// (`compute_unreleasable_range`, `only_quiescent_or_worker`) without going
/// through any lock — a plain `u64`/`i32` pair written by one thread and
/// read by another without synchronization is a data race. The 0→1
/// transition's version capture is a `Release` store; the worker's reads
/// are `Acquire` loads, per spec §9/SPEC_FULL §5.
#[derive(Debug, Default)]
pub struct LocalNamespace {
    version: AtomicU64,
    counter: AtomicI32,
}

impl LocalNamespace {
    /// `lrcu_read_lock_ns`'s per-namespace half: bump the nesting depth,
    /// and on the outermost (0→1) entry, publish `ns_version` with
    /// `Release` ordering so the worker's `Acquire` reads of this slot see
    /// a consistent `{version, counter}` pair. Returns `true` on that
    /// outermost entry.
    pub fn read_lock(&self, ns_version: u64) -> bool {
        let prev = self.counter.fetch_add(1, Ordering::AcqRel);
        if prev == 0 {
            self.version.store(ns_version, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// `lrcu_read_unlock_ns`'s per-namespace half. Panics (the spec's fatal
    /// `CounterUnderflow`) if the counter would go negative.
    pub fn read_unlock(&self) {
        let prev = self.counter.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "read_unlock without a matching read_lock");
    }

    /// `Acquire`-load both fields together, for the worker's per-pass scan.
    pub fn snapshot(&self) -> LnsSnapshot {
        LnsSnapshot {
            version: self.version.load(Ordering::Acquire),
            counter: self.counter.load(Ordering::Acquire),
        }
    }
}

/// One per registered application thread (and one per engine, for the
/// worker's own bookkeeping thread — see spec §4.1 `init`). Lives on the
/// heap, pointed to by the calling thread's TLS slot; never moved once
/// published. Membership in a namespace's thread list goes through a
/// separate, small wrapper node (`namespace::ThreadMembership`) rather than
/// an intrusive link on `ThreadInfo` itself, since one thread can be
/// registered in several namespaces at once and an intrusive link only
/// supports list membership in one list at a time.
pub struct ThreadInfo {
    /// Per-namespace read-section state, shared with the worker thread.
    pub lns: [LocalNamespace; NS_MAX],
    /// The worker's last-observed snapshot of `lns`, used to detect
    /// readers that haven't made progress (spec §4.3). Worker-private: no
    /// other thread ever touches this array, so it stays a plain value.
    pub hung_lns: [LnsSnapshot; NS_MAX],
    /// When the worker first saw `lns[i].counter != 0` without having
    /// already started a timer for it; cleared once `counter` returns to
    /// zero.
    pub hang_timer: [Option<Instant>; NS_MAX],
}

impl ThreadInfo {
    pub fn new() -> Box<ThreadInfo> {
        let mut lns = Vec::with_capacity(NS_MAX);
        for _ in 0..NS_MAX {
            lns.push(LocalNamespace::default());
        }
        Box::new(ThreadInfo {
            lns: lns
                .try_into()
                .unwrap_or_else(|_| panic!("NS_MAX array construction failed")),
            hung_lns: [LnsSnapshot::default(); NS_MAX],
            hang_timer: [None; NS_MAX],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_thread_info_has_zeroed_counters() {
        let ti = ThreadInfo::new();
        assert!(ti
            .lns
            .iter()
            .all(|l| l.snapshot() == LnsSnapshot { version: 0, counter: 0 }));
        assert!(ti.hang_timer.iter().all(|t| t.is_none()));
    }

    #[test]
    fn read_lock_reports_outermost_entry_only() {
        let lns = LocalNamespace::default();
        assert!(lns.read_lock(7));
        assert_eq!(lns.snapshot(), LnsSnapshot { version: 7, counter: 1 });
        assert!(!lns.read_lock(9)); // nested: counter bumps, version untouched
        assert_eq!(lns.snapshot(), LnsSnapshot { version: 7, counter: 2 });
        lns.read_unlock();
        lns.read_unlock();
        assert_eq!(lns.snapshot().counter, 0);
    }

    #[test]
    #[should_panic]
    fn read_unlock_without_lock_panics() {
        let lns = LocalNamespace::default();
        lns.read_unlock();
    }
}
