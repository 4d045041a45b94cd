//! The reclamation worker (spec §4.3). One daemon thread per [`Lrcu`]
//! engine, ported from `examples/original_source/src/lrcu.c`'s
//! `lrcu_worker`.
use crate::config::NS_MAX;
use crate::handler::Lrcu;
use crate::namespace::Namespace;
use crate::thread_info::ThreadInfo;
use std::ptr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

/// The worker's lifecycle state (spec §4.3 "States of the worker").
/// `Ready` is the value before any engine has spawned a worker over it;
/// every real worker thread immediately observes `Run` as installed by
/// `Lrcu::init` and transitions itself to `Running`.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WorkerState {
    Ready = 0,
    Run = 1,
    Running = 2,
    Stop = 3,
    Done = 4,
}

/// Entry point run on the dedicated worker thread. Sets up the worker's own
/// `ThreadInfo` (so any namespace it joins treats it like any other
/// registered thread — see spec §4.1's note that the worker's TI doubles as
/// the anchor that lets `ns_init` re-adopt a pending namespace), flips the
/// state to `Running`, then loops the six-step pass until told to stop.
pub(crate) fn worker_loop(engine: &Arc<Lrcu>) {
    let worker_ti = Box::into_raw(ThreadInfo::new());
    engine.worker_ti_slot().store(worker_ti, Ordering::Release);
    engine
        .worker_state()
        .store(WorkerState::Running as u8, Ordering::Release);

    while engine.worker_state().load(Ordering::Acquire) != WorkerState::Stop as u8 {
        for id in 0..NS_MAX {
            let id = id as u8;
            let ns_ptr = engine.worker_view_slot(id).load(Ordering::Acquire);
            if ns_ptr.is_null() {
                continue;
            }
            // Safety: once published into `worker_view`, a namespace is
            // only freed by this same worker thread (the deferred-teardown
            // step below), so no other thread can invalidate `ns_ptr`
            // between this load and the end of `run_pass`.
            let ns = unsafe { &*ns_ptr };
            run_pass(engine, id, ns, worker_ti);
        }
        thread::sleep(engine.config().worker_period);
    }

    // matches `lrcu_thread_deinit()` at the tail of `lrcu_worker`: the
    // worker's TI is never reachable through TLS, so it is freed directly
    // rather than through `Lrcu::thread_deinit`. The namespaces it is still
    // registered in, if any, drop their membership entries (without
    // touching this freed `ThreadInfo`) during `Lrcu::deinit`'s subsequent
    // forced teardown.
    engine.worker_ti_slot().store(ptr::null_mut(), Ordering::Release);
    unsafe { drop(Box::from_raw(worker_ti)) };
    engine
        .worker_state()
        .store(WorkerState::Done as u8, Ordering::Release);
}

/// One namespace's share of a worker pass: steps 1-6 of spec §4.3.
fn run_pass(engine: &Lrcu, id: u8, ns: &Namespace, worker_ti: *mut ThreadInfo) {
    // Step 1: splice queues.
    ns.splice_queues();

    if !ns.worker_queues_empty() {
        // Step 2: compute safe-release range.
        let mut rbt = ns.compute_unreleasable_range();
        // Step 3: drain releasable callbacks.
        ns.drain_releasable(&mut rbt);
        // Step 4: publish progress.
        ns.publish_progress(&mut rbt);
    }

    // Step 6: deferred NS teardown. Only attempted when this id's worker-side
    // view has drifted from the live table (i.e. `ns_deinit_safe`/`ns_deinit`
    // detached it) and there is nothing left to drain.
    if ns.worker_queues_empty() {
        let live_ptr = engine.live_slot(id).load(Ordering::Acquire);
        let worker_ptr = engine.worker_view_slot(id).load(Ordering::Acquire);
        if !std::ptr::eq(live_ptr, worker_ptr) {
            let _g = engine.ns_lock().lock_guard();
            let live_ptr = engine.live_slot(id).load(Ordering::Acquire);
            let worker_ptr = engine.worker_view_slot(id).load(Ordering::Acquire);
            if !std::ptr::eq(live_ptr, worker_ptr)
                && ns.worker_queues_empty()
                && ns.only_quiescent_or_worker(worker_ti, ns.version())
            {
                engine
                    .worker_view_slot(id)
                    .store(ptr::null_mut(), Ordering::Release);
                // `ns` (a `&Namespace` borrowed from `worker_ptr`) must not
                // be touched again after this point in the pass.
                unsafe { drop(Box::from_raw(worker_ptr)) };
                return;
            }
        }
    }

    // Step 5: liveness write-barrier, unconditional every pass.
    ns.write_barrier();
    if ns.worker_queues_empty() {
        ns.mark_fully_processed();
    }
}
