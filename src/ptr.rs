//! The public reader/writer surface (spec §4.2), plus the canonical
//! publication primitive [`LrcuPtr`].
//!
//! Every operation comes in a default-namespace form (operating on
//! `NS_DEFAULT`) and an explicit `_ns` form, per spec §4.2's "All
//! operations default to namespace 0; an explicit-ns variant exists for
//! every one."
use crate::callback::CallbackNode;
use crate::config::NS_DEFAULT;
use crate::handler::Lrcu;
use crate::namespace::{Namespace, WriteGuard};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::thread;

/// A publication slot: an atomic pointer bound to one namespace. This is
/// the canonical `assign_ptr` shape named in spec.md §9's Open Question —
/// see `DESIGN.md` for the resolution. The raw-pointer form
/// (`assign_pointer`/`dereference` operating directly on a caller-owned
/// `AtomicPtr<T>`) is provided alongside it for callers who don't want the
/// wrapper.
pub struct LrcuPtr<T> {
    slot: AtomicPtr<T>,
    ns_id: u8,
}

impl<T> LrcuPtr<T> {
    pub const fn new(ns_id: u8) -> Self {
        LrcuPtr {
            slot: AtomicPtr::new(ptr::null_mut()),
            ns_id,
        }
    }

    pub fn ns_id(&self) -> u8 {
        self.ns_id
    }

    /// `dereference(p)`: a consume-ordered load of the published pointer.
    /// Rust has no native consume ordering, so `Acquire` stands in — at
    /// least as strong as the spec's minimum, never weaker.
    pub fn dereference(&self) -> *mut T {
        self.slot.load(Ordering::Acquire)
    }

    /// `assign_ptr(ptr_struct, new)`, self-contained variant: bumps the
    /// namespace version itself. Returns the previous pointer, which the
    /// caller is responsible for reclaiming (typically via `call`).
    pub fn assign(&self, engine: &Lrcu, new: *mut T) -> *mut T {
        let ns = engine.namespace(self.ns_id);
        let old = self.slot.load(Ordering::Relaxed);
        ns.publish(&self.slot, new, true);
        old
    }

    /// `assign_ptr`, pre-held-namespace variant: the caller already holds a
    /// [`WriteGuard`] for this pointer's namespace (so the version bump
    /// already happened on `write_lock`); this just stores.
    pub fn assign_locked(&self, guard: &WriteGuard, new: *mut T) -> *mut T {
        assert_eq!(
            guard.namespace().id,
            self.ns_id,
            "assign_locked called with a write guard for a different namespace"
        );
        let old = self.slot.load(Ordering::Relaxed);
        guard.namespace().publish(&self.slot, new, false);
        old
    }
}

/// `assign_pointer(p, new)`, raw-pointer form: bumps the namespace version
/// and stores into a caller-owned `AtomicPtr<T>`.
pub fn assign_pointer_ns<T>(engine: &Lrcu, ns_id: u8, dst: &AtomicPtr<T>, new: *mut T) -> *mut T {
    let ns = engine.namespace(ns_id);
    let old = dst.load(Ordering::Relaxed);
    ns.publish(dst, new, true);
    old
}

pub fn assign_pointer<T>(engine: &Lrcu, dst: &AtomicPtr<T>, new: *mut T) -> *mut T {
    assign_pointer_ns(engine, NS_DEFAULT, dst, new)
}

/// `assign_pointer`, pre-held-namespace variant, the raw-pointer counterpart
/// of [`LrcuPtr::assign_locked`].
pub fn assign_pointer_locked<T>(guard: &WriteGuard, dst: &AtomicPtr<T>, new: *mut T) -> *mut T {
    let old = dst.load(Ordering::Relaxed);
    guard.namespace().publish(dst, new, false);
    old
}

/// `dereference(p)`, raw-pointer form.
pub fn dereference<T>(dst: &AtomicPtr<T>) -> *mut T {
    dst.load(Ordering::Acquire)
}

/// `write_lock(id)`/`write_unlock(id)`.
pub fn write_lock_ns(engine: &Lrcu, ns_id: u8) -> WriteGuard<'_> {
    engine.namespace(ns_id).write_lock()
}

pub fn write_lock(engine: &Lrcu) -> WriteGuard<'_> {
    write_lock_ns(engine, NS_DEFAULT)
}

/// RAII read section, built on the spec's `read_lock`/`read_unlock` pair.
/// Nestable to the same depth as the underlying counter (spec §4.2).
pub struct ReadGuard<'a> {
    ns: &'a Namespace,
    ti: *mut crate::thread_info::ThreadInfo,
}

impl<'a> Drop for ReadGuard<'a> {
    fn drop(&mut self) {
        unsafe { self.ns.read_unlock(&*self.ti) };
    }
}

/// `read_lock(id)` paired with its matching `read_unlock(id)`, expressed as
/// one RAII section so callers can't forget the matching unlock.
pub fn read_section_ns(engine: &Lrcu, ns_id: u8) -> ReadGuard<'_> {
    let ti = engine.current_ti();
    assert!(!ti.is_null(), "thread_init was not called");
    let ns = engine.namespace(ns_id);
    unsafe { ns.read_lock(&*ti) };
    ReadGuard { ns, ti }
}

pub fn read_section(engine: &Lrcu) -> ReadGuard<'_> {
    read_section_ns(engine, NS_DEFAULT)
}

/// `call(id, payload, destructor)`.
pub fn call_ns<T: Send + 'static>(engine: &Lrcu, ns_id: u8, value: Box<T>) {
    engine.namespace(ns_id).call(value);
}

pub fn call<T: Send + 'static>(engine: &Lrcu, value: Box<T>) {
    call_ns(engine, NS_DEFAULT, value);
}

/// `call_head(id, head, func)`: enqueue a caller-embedded [`CallbackNode`]
/// without allocating.
pub fn call_head_ns(
    engine: &Lrcu,
    ns_id: u8,
    node: *mut CallbackNode,
    run_fn: unsafe fn(*mut CallbackNode),
) {
    engine.namespace(ns_id).call_head(node, run_fn);
}

pub fn call_head(engine: &Lrcu, node: *mut CallbackNode, run_fn: unsafe fn(*mut CallbackNode)) {
    call_head_ns(engine, NS_DEFAULT, node, run_fn);
}

/// Poll until `ns`'s snapshotted version is no longer inside any
/// unreleasable range — the core of both `synchronize` and `barrier`.
pub(crate) fn synchronize_on(ns: &Namespace) {
    let current_version = ns.version();
    loop {
        let mut rbt = ns.compute_unreleasable_range();
        if !rbt.find(current_version) {
            return;
        }
        thread::sleep(ns.sync_timeout());
    }
}

/// Poll until every callback up to `ns`'s snapshotted version has actually
/// run (`processed_version` has passed it), not merely that it could.
pub(crate) fn wait_processed(ns: &Namespace) {
    let current_version = ns.version();
    loop {
        if current_version < ns.processed_version() {
            return;
        }
        thread::sleep(ns.sync_timeout());
    }
}

/// `synchronize`/`barrier` must never be called from inside one of the
/// caller's own open read sections on `ns_id`: a thread's own read interval
/// always covers its own snapshotted version, so `synchronize_on` would spin
/// forever waiting on a range it is itself holding open. Fatal per spec §4.2
/// / §7, mirroring the original's `LRCU_ASSERT(...counter == 0)`. Also
/// enforces the `thread_init` precondition these entry points otherwise skip.
fn assert_quiescent_for_sync(engine: &Lrcu, ns_id: u8) {
    let ti = engine.current_ti();
    assert!(!ti.is_null(), "thread_init was not called");
    let counter = unsafe { (*ti).lns[ns_id as usize].snapshot().counter };
    assert_eq!(
        counter, 0,
        "synchronize/barrier called with an open read section on namespace {}",
        ns_id
    );
}

/// `synchronize(id)`.
pub fn synchronize_ns(engine: &Lrcu, ns_id: u8) {
    assert_quiescent_for_sync(engine, ns_id);
    synchronize_on(engine.namespace(ns_id));
}

pub fn synchronize(engine: &Lrcu) {
    synchronize_ns(engine, NS_DEFAULT);
}

/// `barrier(id)`: per spec.md §9's Open Question resolution, this waits on
/// `processed_version` in addition to (not instead of) what `synchronize`
/// waits on.
pub fn barrier_ns(engine: &Lrcu, ns_id: u8) {
    assert_quiescent_for_sync(engine, ns_id);
    let ns = engine.namespace(ns_id);
    synchronize_on(ns);
    wait_processed(ns);
}

pub fn barrier(engine: &Lrcu) {
    barrier_ns(engine, NS_DEFAULT);
}
