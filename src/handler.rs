//! The engine object (spec §4.5 "Handler & Lifecycle").
//!
//! Per spec.md §9's re-architecture note, this replaces the original's
//! process-wide `__lrcu_handler` global plus `LRCU_TLS_DEFINE` thread-local
//! with an explicit object. Callers typically hold it behind `Arc<Lrcu>` so
//! the worker thread and application threads can share ownership; this
//! module does not itself reach for a global/lazily-initialized singleton.
use crate::config::{LrcuConfig, NS_DEFAULT, NS_MAX};
use crate::error::Status;
use crate::namespace::Namespace;
use crate::spin_lock::SpinLock;
use crate::thread_info::ThreadInfo;
use crate::worker::{worker_loop, WorkerState};
use std::cell::Cell;
use std::convert::TryInto;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

/// One reclamation engine. Owns the namespace table, the worker thread, and
/// the lock serializing namespace lifecycle operations. Readers/writers
/// reach it through the free functions in `ptr.rs`, which take `&Lrcu`
/// (usually obtained from an `Arc<Lrcu>` held by the application).
pub struct Lrcu {
    config: LrcuConfig,
    /// `H.ns[]` in the original: the namespace a fresh `ns_init` call (or a
    /// reader/writer dereferencing `ns_id`) observes. Cleared by
    /// `ns_deinit`/`ns_deinit_safe` ahead of the worker's own teardown.
    live: [AtomicPtr<Namespace>; NS_MAX],
    /// `H.worker[]`: the worker's own view, which can briefly lag behind
    /// `live` for an id pending teardown. Touched only under `ns_lock` or
    /// from the worker thread itself.
    worker_view: [AtomicPtr<Namespace>; NS_MAX],
    ns_lock: SpinLock,
    worker_state: AtomicU8,
    worker_ti: AtomicPtr<ThreadInfo>,
    worker_join: SpinLock,
    worker_thread: std::sync::Mutex<Option<thread::JoinHandle<()>>>,
}

unsafe impl Sync for Lrcu {}
unsafe impl Send for Lrcu {}

thread_local! {
    /// The calling thread's `ThreadInfo`, keyed implicitly per-process
    /// (one `Lrcu` per process is the common case); multiple concurrent
    /// engines in one process must not share threads, matching the
    /// original's single-handler-per-process assumption.
    static CURRENT_TI: Cell<*mut ThreadInfo> = Cell::new(ptr::null_mut());
}

impl Lrcu {
    /// `lrcu_init`/`__lrcu_init`: spawn the worker, wait for it to report
    /// `Running`, then bring up the default namespace. Tears down anything
    /// already built if a later step fails.
    pub fn init(config: LrcuConfig) -> Result<Arc<Lrcu>, Status> {
        let engine = Arc::new(Lrcu {
            config,
            live: array_of_null_atomics(),
            worker_view: array_of_null_atomics(),
            ns_lock: SpinLock::new(),
            worker_state: AtomicU8::new(WorkerState::Run as u8),
            worker_ti: AtomicPtr::new(ptr::null_mut()),
            worker_join: SpinLock::new(),
            worker_thread: std::sync::Mutex::new(None),
        });

        let worker_engine = engine.clone();
        let handle = thread::Builder::new()
            .name("lrcu-worker".into())
            .spawn(move || worker_loop(&worker_engine))
            .map_err(|_| Status::WorkerStartFailed)?;
        *engine.worker_thread.lock().unwrap() = Some(handle);

        while engine.worker_state.load(Ordering::Acquire) == WorkerState::Run as u8 {
            thread::sleep(std::time::Duration::from_micros(1));
        }
        if engine.worker_state.load(Ordering::Acquire) != WorkerState::Running as u8 {
            return Err(Status::WorkerStartFailed);
        }

        engine.ns_init(NS_DEFAULT)?;
        Ok(engine)
    }

    pub fn config(&self) -> LrcuConfig {
        self.config
    }

    pub(crate) fn worker_state(&self) -> &AtomicU8 {
        &self.worker_state
    }

    pub(crate) fn worker_ti_slot(&self) -> &AtomicPtr<ThreadInfo> {
        &self.worker_ti
    }

    pub(crate) fn live_slot(&self, id: u8) -> &AtomicPtr<Namespace> {
        &self.live[id as usize]
    }

    pub(crate) fn worker_view_slot(&self, id: u8) -> &AtomicPtr<Namespace> {
        &self.worker_view[id as usize]
    }

    pub(crate) fn ns_lock(&self) -> &SpinLock {
        &self.ns_lock
    }

    /// Look up the live namespace for `id`, panicking if it isn't
    /// registered — matches `LRCU_ASSERT(ns)` at every original call site;
    /// dereferencing an unregistered namespace is a programmer error, not a
    /// recoverable one.
    pub fn namespace(&self, id: u8) -> &Namespace {
        let ptr = self.live[id as usize].load(Ordering::Acquire);
        assert!(!ptr.is_null(), "namespace {} is not initialized", id);
        unsafe { &*ptr }
    }

    pub fn try_namespace(&self, id: u8) -> Option<&Namespace> {
        let ptr = self.live[id as usize].load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { &*ptr })
        }
    }

    /// `lrcu_ns_init`: bring namespace `id` up, or re-adopt one that is
    /// still pending worker teardown.
    pub fn ns_init(&self, id: u8) -> Result<(), Status> {
        let _g = self.ns_lock.lock_guard();
        if !self.live[id as usize].load(Ordering::Acquire).is_null() {
            return Err(Status::Exists);
        }
        let worker_ti = self.worker_ti.load(Ordering::Acquire);
        assert!(!worker_ti.is_null(), "worker not started");

        let pending = self.worker_view[id as usize].load(Ordering::Acquire);
        if !pending.is_null() {
            let ns = unsafe { &*pending };
            ns.register_thread_if_absent(worker_ti);
            self.live[id as usize].store(pending, Ordering::Release);
            return Ok(());
        }

        let ns = Box::new(Namespace::new(id, self.config));
        ns.register_thread_if_absent(worker_ti);
        let raw = Box::into_raw(ns);
        self.live[id as usize].store(raw, Ordering::Release);
        self.worker_view[id as usize].store(raw, Ordering::Release);
        Ok(())
    }

    /// `lrcu_ns_deinit_safe`: detach the namespace from `live` and bump its
    /// version; actual teardown is left to the worker's deferred-teardown
    /// step once every reader has moved past it.
    pub fn ns_deinit_safe(&self, id: u8) {
        let _g = self.ns_lock.lock_guard();
        let ptr = self.live[id as usize].swap(ptr::null_mut(), Ordering::AcqRel);
        assert!(!ptr.is_null(), "namespace {} is not initialized", id);
        unsafe { &*ptr }.write_barrier();
    }

    /// `lrcu_ns_deinit`: forced, synchronous teardown — wait for every
    /// pending callback to actually run, then free the namespace inline.
    pub fn ns_deinit(&self, id: u8) {
        let _g = self.ns_lock.lock_guard();
        let ptr = self.live[id as usize].swap(ptr::null_mut(), Ordering::AcqRel);
        assert!(!ptr.is_null(), "namespace {} is not initialized", id);
        let ns = unsafe { &*ptr };
        ns.write_barrier();
        crate::ptr::synchronize_on(ns);
        crate::ptr::wait_processed(ns);
        let worker_ptr = self.worker_view[id as usize].load(Ordering::Acquire);
        debug_assert_eq!(worker_ptr, ptr);
        self.worker_view[id as usize].store(ptr::null_mut(), Ordering::Release);
        unsafe { drop(Box::from_raw(ptr)) }; // Namespace::drop clears its thread lists
    }

    /// `lrcu_thread_init` + `lrcu_thread_set_ns(NS_DEFAULT)`.
    pub fn thread_init(&self) -> Result<(), Status> {
        let ti = Box::into_raw(ThreadInfo::new());
        CURRENT_TI.with(|c| c.set(ti));
        self.thread_set_ns(NS_DEFAULT)
    }

    /// `lrcu_thread_set_ns`: join the calling thread's `ThreadInfo` to
    /// namespace `id`'s thread list.
    pub fn thread_set_ns(&self, id: u8) -> Result<(), Status> {
        let ti = CURRENT_TI.with(|c| c.get());
        assert!(!ti.is_null(), "thread_init was not called");
        let ns = self.namespace(id);
        ns.register_thread(ti);
        Ok(())
    }

    /// `lrcu_thread_del_ns`.
    pub fn thread_del_ns(&self, id: u8) -> bool {
        let ti = CURRENT_TI.with(|c| c.get());
        assert!(!ti.is_null(), "thread_init was not called");
        self.namespace(id).unregister_thread(ti)
    }

    /// `lrcu_thread_deinit`: leave every namespace, then free the TI.
    pub fn thread_deinit(&self) {
        let ti = CURRENT_TI.with(|c| c.replace(ptr::null_mut()));
        assert!(!ti.is_null(), "thread_init was not called");
        for id in 0..NS_MAX {
            if let Some(ns) = self.try_namespace(id as u8) {
                ns.unregister_thread(ti);
            }
        }
        unsafe { drop(Box::from_raw(ti)) };
    }

    pub(crate) fn current_ti(&self) -> *mut ThreadInfo {
        CURRENT_TI.with(|c| c.get())
    }

    /// `lrcu_deinit`: stop the worker, join it, force-tear-down every
    /// remaining namespace.
    ///
    /// Unlike `ns_deinit`, this cannot call `synchronize`/`barrier` on what
    /// it tears down: both poll for the worker to make further progress,
    /// and by this point the worker thread has already been joined and will
    /// never run another pass. Instead this drains whatever is left in each
    /// namespace's queues directly (spec §4.5: "Destroys all remaining
    /// namespaces unconditionally (forced mode)"), mirroring
    /// `lrcu_ns_destructor(ns, true)` in the original, which frees every
    /// thread-list entry unconditionally rather than waiting on it.
    pub fn deinit(&self) {
        let _g = self.worker_join.lock_guard();
        self.worker_state.store(WorkerState::Stop as u8, Ordering::Release);
        if let Some(handle) = self.worker_thread.lock().unwrap().take() {
            handle.join().expect("lrcu worker thread panicked");
        }
        for id in 0..NS_MAX {
            let live_ptr = self.live[id].swap(ptr::null_mut(), Ordering::AcqRel);
            let worker_ptr = self.worker_view[id].swap(ptr::null_mut(), Ordering::AcqRel);
            // Usually these coincide; they differ only for an id whose
            // `ns_deinit_safe` detached it from `live` before the worker
            // could finish the deferred teardown in its last pass.
            let ns_ptr = if !live_ptr.is_null() { live_ptr } else { worker_ptr };
            if ns_ptr.is_null() {
                continue;
            }
            let ns = unsafe { &*ns_ptr };
            ns.splice_queues();
            ns.drain_all_forced();
            unsafe { drop(Box::from_raw(ns_ptr)) }; // Namespace::drop clears its thread lists
        }
    }
}

impl Drop for Lrcu {
    fn drop(&mut self) {
        if self.worker_state.load(Ordering::Acquire) != WorkerState::Done as u8 {
            self.deinit();
        }
    }
}

fn array_of_null_atomics<T>() -> [AtomicPtr<T>; NS_MAX] {
    // `AtomicPtr<T>` is not `Copy`, so the array must be built element by
    // element; `NS_MAX` stays a compile-time constant precisely so this is
    // the only place that has to care about its value.
    let mut v: Vec<AtomicPtr<T>> = Vec::with_capacity(NS_MAX);
    for _ in 0..NS_MAX {
        v.push(AtomicPtr::new(ptr::null_mut()));
    }
    v.try_into()
        .unwrap_or_else(|_| panic!("NS_MAX array construction failed"))
}
