//! A self-contained epoch domain (spec §3 "Namespace", §4.1).
//!
//! Ported from `examples/original_source/src/lrcu.c`'s
//! `struct lrcu_namespace` and the `lrcu_*_ns` functions that operate on
//! it, using the teacher's `WrappedAlign64Type`/`SpinLock` idioms in place
//! of the original's hand-placed memory barriers.
use crate::callback::{CallbackNode, PendingCallback};
use crate::config::LrcuConfig;
use crate::list::{AtomicForwardList, ForwardList, ListNode};
use crate::range_set::{OptLevel, RangeSet};
use crate::spin_lock::SpinLock;
use crate::thread_info::{LnsSnapshot, ThreadInfo};
use crate::util::WrappedAlign64Type;
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::time::Instant;

/// A namespace's self-contained reclamation state. Exclusively owned by
/// the engine; torn down only once no reader can still reach it (spec
/// §4.1 `deinit`/`deinit_safe`).
pub struct Namespace {
    pub id: u8,
    config: LrcuConfig,
    version: WrappedAlign64Type<AtomicU64>,
    processed_version: WrappedAlign64Type<AtomicU64>,
    write_lock: SpinLock,
    threads_lock: SpinLock,
    active_threads: UnsafeCell<ForwardList<ThreadMembership>>,
    hung_threads: UnsafeCell<ForwardList<ThreadMembership>>,
    free_queue: AtomicForwardList<PendingCallback>,
    worker_queue: UnsafeCell<ForwardList<PendingCallback>>,
    free_hqueue: AtomicForwardList<CallbackNode>,
    worker_hqueue: UnsafeCell<ForwardList<CallbackNode>>,
}

// Every field above is either a lock-free atomic, a `SpinLock`-guarded
// `UnsafeCell`, or a lock-free MPSC list. Access discipline is enforced by
// convention the same way the teacher crate trusts its raw-pointer
// invariants instead of the type system.
unsafe impl Sync for Namespace {}
unsafe impl Send for Namespace {}

/// One thread's membership in one namespace's thread list. A separately
/// allocated wrapper, not an intrusive link on `ThreadInfo` itself, because
/// a single thread can be registered in several namespaces at once — the
/// same role `lrcu_list_t`'s boxed copy of the `ti` pointer plays in the
/// original (`lrcu_list_add(&ns->threads, ti)`).
struct ThreadMembership {
    next: *mut ThreadMembership,
    ti: *mut ThreadInfo,
}

impl ListNode for ThreadMembership {
    fn next_ptr(&self) -> *mut ThreadMembership {
        self.next
    }
    fn set_next_ptr(&mut self, next: *mut ThreadMembership) {
        self.next = next;
    }
}

impl Namespace {
    pub fn new(id: u8, config: LrcuConfig) -> Namespace {
        Namespace {
            id,
            config,
            version: WrappedAlign64Type(AtomicU64::new(1)),
            processed_version: WrappedAlign64Type(AtomicU64::new(0)),
            write_lock: SpinLock::new(),
            threads_lock: SpinLock::new(),
            active_threads: UnsafeCell::new(ForwardList::new()),
            hung_threads: UnsafeCell::new(ForwardList::new()),
            free_queue: AtomicForwardList::new(),
            worker_queue: UnsafeCell::new(ForwardList::new()),
            free_hqueue: AtomicForwardList::new(),
            worker_hqueue: UnsafeCell::new(ForwardList::new()),
        }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn processed_version(&self) -> u64 {
        self.processed_version.load(Ordering::Acquire)
    }

    pub fn sync_timeout(&self) -> std::time::Duration {
        self.config.sync_timeout
    }

    /// `lrcu_write_barrier_ns`: bump the version so new publications are
    /// only visible under a fresh version. Used both by the writer path
    /// and, unconditionally, by the worker after every pass (spec §4.3
    /// step 5, "liveness write-barrier").
    pub fn write_barrier(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Acquire the namespace's write lock and bump the version
    /// (`lrcu_write_lock_ns`). The namespace is not nestable: a second
    /// `write_lock` on the same thread before `write_unlock` will
    /// deadlock against itself, exactly as a non-reentrant lock would —
    /// this is a programmer error per spec §4.2.
    pub fn write_lock(&self) -> WriteGuard<'_> {
        self.write_lock.lock();
        self.write_barrier();
        WriteGuard { ns: self }
    }

    fn write_unlock(&self) {
        self.write_lock.unlock();
    }

    /// Publish `new` into `dst` from within a writer section: bump the
    /// version (unless the caller already holds a [`WriteGuard`], in which
    /// case the bump already happened) and store with release ordering.
    /// Backs both `assign_pointer` (raw form) and `LrcuPtr::assign`
    /// (struct form) — see `ptr.rs`.
    pub fn publish<T>(&self, dst: &AtomicPtr<T>, new: *mut T, bump: bool) {
        if bump {
            self.write_barrier();
        }
        dst.store(new, Ordering::Release);
    }

    /// `lrcu_read_lock_ns`. Returns `true` if this is the outermost entry
    /// (i.e. the thread's recorded `lns.version` was just refreshed). Takes
    /// `ti` by shared reference: the per-namespace slot it touches is
    /// atomic precisely so the reader fast path never needs `&mut
    /// ThreadInfo` while the worker thread concurrently reads the same
    /// slot.
    pub fn read_lock(&self, ti: &ThreadInfo) -> bool {
        ti.lns[self.id as usize].read_lock(self.version())
    }

    /// `lrcu_read_unlock_ns`. Panics (the spec's fatal `CounterUnderflow`)
    /// if the thread's counter would go negative.
    pub fn read_unlock(&self, ti: &ThreadInfo) {
        ti.lns[self.id as usize].read_unlock();
    }

    /// `lrcu_call_ns`: enqueue an owned payload to be dropped once
    /// `version` is unreachable.
    pub fn call<T: Send + 'static>(&self, value: Box<T>) {
        let version = self.version();
        let node = Box::into_raw(PendingCallback::new(value, version));
        unsafe { self.free_queue.push(node) };
    }

    /// `lrcu_call_head_ns`: enqueue a caller-embedded node, no allocation.
    pub fn call_head(&self, node: *mut CallbackNode, run_fn: unsafe fn(*mut CallbackNode)) {
        let version = self.version();
        unsafe {
            (*node).arm(version, run_fn);
            self.free_hqueue.push(node);
        }
    }

    /// Append `ti` to the active-threads list under `threads_lock`
    /// (`lrcu_thread_set_ns`). Always adds a fresh membership entry, even
    /// if `ti` is already registered — matching `lrcu_list_add`'s
    /// unconditional insert.
    pub fn register_thread(&self, ti: *mut ThreadInfo) {
        let node = Box::into_raw(Box::new(ThreadMembership {
            next: ptr::null_mut(),
            ti,
        }));
        let _g = self.threads_lock.lock_guard();
        unsafe { (*self.active_threads.get()).push_back(node) };
    }

    /// Like [`register_thread`](Self::register_thread), but a no-op if
    /// `ti` is already present in either thread list — used by `ns_init`'s
    /// re-adoption path so repeated init/deinit_safe cycles on the same id
    /// don't accumulate duplicate entries for the worker's own `ThreadInfo`.
    pub fn register_thread_if_absent(&self, ti: *mut ThreadInfo) {
        let _g = self.threads_lock.lock_guard();
        unsafe {
            let present = (*self.active_threads.get())
                .find_with_prev(|m| m.ti == ti)
                .is_some()
                || (*self.hung_threads.get())
                    .find_with_prev(|m| m.ti == ti)
                    .is_some();
            if present {
                return;
            }
            let node = Box::into_raw(Box::new(ThreadMembership {
                next: ptr::null_mut(),
                ti,
            }));
            (*self.active_threads.get()).push_back(node);
        }
    }

    /// Remove one membership entry for `ti` from whichever thread list
    /// (active or hung) currently holds it (`thread_remove_from_ns`).
    /// Returns `true` if found. Frees the membership wrapper, never `ti`
    /// itself — `ti` is owned by the thread that created it.
    pub fn unregister_thread(&self, ti: *mut ThreadInfo) -> bool {
        let _g = self.threads_lock.lock_guard();
        unsafe {
            let active = &mut *self.active_threads.get();
            if let Some((prev, _)) = active.find_with_prev(|m| m.ti == ti) {
                let node = active.unlink_next(prev);
                drop(Box::from_raw(node));
                return true;
            }
            let hung = &mut *self.hung_threads.get();
            if let Some((prev, _)) = hung.find_with_prev(|m| m.ti == ti) {
                let node = hung.unlink_next(prev);
                drop(Box::from_raw(node));
                return true;
            }
        }
        false
    }

    /// `true` iff every membership left registered either belongs to
    /// `worker_ti` (the worker's own bookkeeping thread) or is quiescent
    /// and past `min_version` — the condition `lrcu_ns_destructor` checks
    /// before freeing an orphaned namespace.
    pub fn only_quiescent_or_worker(&self, worker_ti: *mut ThreadInfo, min_version: u64) -> bool {
        let _g = self.threads_lock.lock_guard();
        let mut ok = true;
        unsafe {
            (*self.active_threads.get()).walk(|_, node| {
                let ti = (*node).ti;
                if ti != worker_ti {
                    let lns = (*ti).lns[self.id as usize].snapshot();
                    if !(lns.counter == 0 && lns.version >= min_version) {
                        ok = false;
                        return false;
                    }
                }
                true
            });
            if ok {
                (*self.hung_threads.get()).walk(|_, node| {
                    if (*node).ti != worker_ti {
                        ok = false;
                        return false;
                    }
                    true
                });
            }
        }
        ok
    }

    /// Unconditionally drop every thread membership (`lrcu_ns_destructor`
    /// with `forced = true`). Never touches `ThreadInfo` itself.
    pub fn force_reclaim_threads(&self) {
        let _g = self.threads_lock.lock_guard();
        unsafe {
            free_all_memberships(&mut *self.active_threads.get());
            free_all_memberships(&mut *self.hung_threads.get());
        }
    }

    /// Splice the lock-free producer queues into the worker's private
    /// queues (spec §4.3 step 1).
    pub fn splice_queues(&self) {
        if !self.free_queue.is_empty() {
            let mut incoming = reversed_chain(self.free_queue.take_all());
            unsafe { (*self.worker_queue.get()).splice_from(&mut incoming) };
        }
        if !self.free_hqueue.is_empty() {
            let mut incoming = reversed_chain(self.free_hqueue.take_all());
            unsafe { (*self.worker_hqueue.get()).splice_from(&mut incoming) };
        }
    }

    pub fn worker_queues_empty(&self) -> bool {
        unsafe { (*self.worker_queue.get()).is_empty() && (*self.worker_hqueue.get()).is_empty() }
    }

    /// Drain every worker-queue entry whose version is not in `rbt`,
    /// invoking its destructor (spec §4.3 step 3). Returns the number of
    /// entries drained.
    pub fn drain_releasable(&self, rbt: &mut RangeSet) -> usize {
        let mut drained = 0;
        unsafe {
            let queue = &mut *self.worker_queue.get();
            while let Some((prev, node)) = queue.find_with_prev(|cb| !rbt.find(cb.version)) {
                let unlinked = queue.unlink_next(prev);
                debug_assert_eq!(unlinked, node);
                Box::from_raw(node).run();
                drained += 1;
            }
            let hqueue = &mut *self.worker_hqueue.get();
            while let Some((prev, node)) = hqueue.find_with_prev(|cb| !rbt.find(cb.version)) {
                let unlinked = hqueue.unlink_next(prev);
                debug_assert_eq!(unlinked, node);
                CallbackNode::run(node);
                drained += 1;
            }
        }
        drained
    }

    /// `__lrcu_get_synchronized`: the core range computation (spec §4.3
    /// "Range computation"). Builds the set of version intervals that
    /// cannot yet be reclaimed, moving readers between the active/hung
    /// thread lists as their hang timers expire or clear.
    pub fn compute_unreleasable_range(&self) -> RangeSet {
        let current_version = self.version();
        let mut rbt = RangeSet::new();
        let _g = self.threads_lock.lock_guard();
        unsafe {
            let active = &mut *self.active_threads.get();
            let mut to_demote = Vec::new();
            active.walk(|prev, node| {
                let ti = (*node).ti;
                let lns = (*ti).lns[self.id as usize].snapshot();
                let hung_lns = (*ti).hung_lns[self.id as usize];
                if lns.counter != 0 {
                    rbt.add(lns.version, current_version);
                    if let Some(started) = (*ti).hang_timer[self.id as usize] {
                        if lns.version <= hung_lns.version
                            && started.elapsed() >= self.config.hang_timeout
                        {
                            log::warn!("lazy_rcu: namespace {} hung reader detected", self.id);
                            to_demote.push((prev, node));
                        }
                    } else {
                        (*ti).hang_timer[self.id as usize] = Some(Instant::now());
                    }
                    (*ti).hung_lns[self.id as usize] = LnsSnapshot {
                        version: current_version,
                        counter: lns.counter,
                    };
                } else {
                    (*ti).hang_timer[self.id as usize] = None;
                }
                true
            });
            // Demotions are collected then applied afterwards: `walk`
            // hands out `prev` relative to the list *before* any
            // unlinking, so unlinking mid-walk would invalidate later
            // `prev` pointers.
            for (prev, node) in to_demote {
                let unlinked = active.unlink_next(prev);
                debug_assert_eq!(unlinked, node);
                (*self.hung_threads.get()).push_back(node);
            }

            let hung = &mut *self.hung_threads.get();
            let mut to_promote = Vec::new();
            hung.walk(|prev, node| {
                let ti = (*node).ti;
                let lns = (*ti).lns[self.id as usize].snapshot();
                let hung_lns = (*ti).hung_lns[self.id as usize];
                if lns.version > hung_lns.version || lns.counter == 0 {
                    to_promote.push((prev, node));
                }
                if lns.counter != 0 {
                    if lns.version > hung_lns.version {
                        rbt.add(lns.version, current_version);
                    } else {
                        rbt.add(lns.version, hung_lns.version);
                    }
                }
                true
            });
            for (prev, node) in to_promote {
                let unlinked = hung.unlink_next(prev);
                debug_assert_eq!(unlinked, node);
                active.push_back(node);
            }
        }
        rbt.optimize(OptLevel::Merge);
        rbt
    }

    /// `ns->processed_version = min(rbt) or ns->version + 1 if empty`
    /// (spec §4.3 step 4).
    pub fn publish_progress(&self, rbt: &mut RangeSet) {
        let min = rbt.min();
        let new_processed = if min == 0 { self.version() + 1 } else { min };
        self.processed_version.store(new_processed, Ordering::Release);
    }

    pub fn mark_fully_processed(&self) {
        self.processed_version.store(self.version(), Ordering::Release);
    }

    /// Run every still-queued callback regardless of version, ignoring the
    /// range set entirely. Used only by `Lrcu::deinit`'s forced engine-wide
    /// teardown, which runs *after* the worker thread has already been
    /// joined — at that point no further passes will ever splice or drain
    /// these queues, so waiting on `synchronize`/`barrier` semantics (which
    /// both assume the worker is still advancing) would hang forever. Does
    /// not wait for active readers either: spec §4.5 marks engine-wide
    /// teardown "forced", matching `lrcu_ns_destructor(ns, true)` in the
    /// original, which frees every thread-list entry unconditionally.
    pub fn drain_all_forced(&self) {
        unsafe {
            let queue = &mut *self.worker_queue.get();
            while !queue.is_empty() {
                let node = queue.unlink_next(ptr::null_mut());
                Box::from_raw(node).run();
            }
            let hqueue = &mut *self.worker_hqueue.get();
            while !hqueue.is_empty() {
                let node = hqueue.unlink_next(ptr::null_mut());
                CallbackNode::run(node);
            }
        }
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        self.force_reclaim_threads();
    }
}

unsafe fn free_all_memberships(list: &mut ForwardList<ThreadMembership>) {
    while !list.is_empty() {
        let node = list.unlink_next(ptr::null_mut());
        drop(Box::from_raw(node));
    }
}

/// `AtomicForwardList::take_all` hands back a chain in reverse push order;
/// flip it into insertion order so FIFO producers observe FIFO reclamation,
/// returning a plain `ForwardList` ready to be spliced onto the worker's
/// private queue.
fn reversed_chain<T: ListNode>(head: *mut T) -> ForwardList<T> {
    let mut nodes = Vec::new();
    let mut cur = head;
    while !cur.is_null() {
        let next = unsafe { (*cur).next_ptr() };
        nodes.push(cur);
        cur = next;
    }
    let mut out = ForwardList::new();
    for node in nodes.into_iter().rev() {
        unsafe { out.push_back(node) };
    }
    out
}

/// RAII guard for a held writer section (`lrcu_write_lock_ns` /
/// `lrcu_write_unlock_ns`). Not nestable, not `Send` across threads.
pub struct WriteGuard<'a> {
    ns: &'a Namespace,
}

impl<'a> WriteGuard<'a> {
    pub fn namespace(&self) -> &Namespace {
        self.ns
    }
}

impl<'a> Drop for WriteGuard<'a> {
    fn drop(&mut self) {
        self.ns.write_unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread_info::ThreadInfo;

    #[test]
    fn write_lock_bumps_version_exactly_once() {
        let ns = Namespace::new(0, LrcuConfig::default());
        let before = ns.version();
        {
            let _g = ns.write_lock();
        }
        assert_eq!(ns.version(), before + 1);
    }

    #[test]
    fn nested_read_lock_only_snapshots_version_on_outer_entry() {
        let ns = Namespace::new(0, LrcuConfig::default());
        let ti = ThreadInfo::new();
        assert!(ns.read_lock(&ti));
        let v1 = ti.lns[0].snapshot().version;
        {
            let _g = ns.write_lock();
        }
        assert!(!ns.read_lock(&ti)); // nested entry, counter == 2
        assert_eq!(ti.lns[0].snapshot().version, v1); // unchanged by the nested entry
        ns.read_unlock(&ti);
        assert_eq!(ti.lns[0].snapshot().counter, 1);
        ns.read_unlock(&ti);
        assert_eq!(ti.lns[0].snapshot().counter, 0);
    }

    #[test]
    #[should_panic]
    fn read_unlock_without_lock_panics() {
        let ns = Namespace::new(0, LrcuConfig::default());
        let ti = ThreadInfo::new();
        ns.read_unlock(&ti);
    }

    #[test]
    fn quiescent_reader_is_not_in_unreleasable_range() {
        let ns = Namespace::new(0, LrcuConfig::default());
        let ti = Box::into_raw(ThreadInfo::new());
        ns.register_thread(ti);
        ns.call(Box::new(42));
        ns.splice_queues();
        let mut rbt = ns.compute_unreleasable_range();
        assert!(!rbt.find(1));
        ns.unregister_thread(ti);
        unsafe { drop(Box::from_raw(ti)) };
    }

    #[test]
    fn active_reader_blocks_its_captured_version() {
        let ns = Namespace::new(0, LrcuConfig::default());
        let ti_box = ThreadInfo::new();
        let ti = Box::into_raw(ti_box);
        ns.register_thread(ti);
        unsafe { ns.read_lock(&*ti) };
        let mut rbt = ns.compute_unreleasable_range();
        assert!(rbt.find(1));
        unsafe { ns.read_unlock(&*ti) };
        ns.unregister_thread(ti);
        unsafe { drop(Box::from_raw(ti)) };
    }

    #[test]
    fn one_thread_can_be_registered_in_two_namespaces_at_once() {
        let ns_a = Namespace::new(0, LrcuConfig::default());
        let ns_b = Namespace::new(1, LrcuConfig::default());
        let ti = Box::into_raw(ThreadInfo::new());
        ns_a.register_thread(ti);
        ns_b.register_thread(ti);
        unsafe { ns_a.read_lock(&*ti) };
        assert!(ns_a.compute_unreleasable_range().find(1));
        assert!(!ns_b.compute_unreleasable_range().find(1));
        unsafe { ns_a.read_unlock(&*ti) };
        assert!(ns_a.unregister_thread(ti));
        assert!(ns_b.unregister_thread(ti));
        unsafe { drop(Box::from_raw(ti)) };
    }

    #[test]
    fn register_thread_if_absent_does_not_duplicate() {
        let ns = Namespace::new(0, LrcuConfig::default());
        let ti = Box::into_raw(ThreadInfo::new());
        ns.register_thread_if_absent(ti);
        ns.register_thread_if_absent(ti);
        assert!(ns.unregister_thread(ti));
        assert!(!ns.unregister_thread(ti));
        unsafe { drop(Box::from_raw(ti)) };
    }
}
