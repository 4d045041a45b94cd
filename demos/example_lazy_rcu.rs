//! Multi-reader/multi-writer stress harness for the lazy RCU engine,
//! modeled on `examples/original_source/per_thread_test.c`'s reader/writer
//! pair over a shared list: N readers repeatedly traverse the published
//! value, M writers repeatedly publish a fresh one and retire the old one.
//! Run with `RUST_LOG=info cargo run --example example_lazy_rcu -- <readers>
//! <writers> <seconds>`.
extern crate core_affinity;
extern crate env_logger;
extern crate lazy_rcu;
#[macro_use]
extern crate log;

use lazy_rcu::config::{LrcuConfig, NS_DEFAULT};
use lazy_rcu::LrcuPtr;
use std::env;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct WorkingData {
    c: u64,
}

const INVALID_AFTER: u64 = u64::MAX;

impl Drop for WorkingData {
    fn drop(&mut self) {
        trace!("destructor c={}", self.c);
        self.c = INVALID_AFTER;
    }
}

fn set_cpu_affinity(slot: usize) {
    if let Some(cpus) = core_affinity::get_core_ids() {
        if !cpus.is_empty() {
            core_affinity::set_for_current(cpus[slot % cpus.len()]);
        }
    }
}

fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let readers: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(2);
    let writers: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(1);
    let seconds: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(5);

    let engine = lazy_rcu::Lrcu::init(LrcuConfig::default()).expect("lrcu init failed");
    let shared: Arc<LrcuPtr<WorkingData>> = Arc::new(LrcuPtr::new(NS_DEFAULT));
    engine.thread_init().expect("thread_init");
    {
        let g = lazy_rcu::write_lock(&engine);
        shared.assign_locked(&g, Box::into_raw(Box::new(WorkingData { c: 0 })));
    }
    engine.thread_deinit();

    let stop = Arc::new(AtomicBool::new(false));
    let reads = Arc::new(AtomicU64::new(0));
    let writes = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::new();

    for i in 0..readers {
        let engine = engine.clone();
        let shared = shared.clone();
        let stop = stop.clone();
        let reads = reads.clone();
        handles.push(thread::spawn(move || {
            set_cpu_affinity(i);
            engine.thread_init().expect("thread_init");
            while !stop.load(Ordering::Relaxed) {
                let _g = lazy_rcu::read_section(&engine);
                let raw = shared.dereference();
                if !raw.is_null() {
                    let c = unsafe { (*raw).c };
                    debug_assert_ne!(c, INVALID_AFTER);
                }
                reads.fetch_add(1, Ordering::Relaxed);
            }
            engine.thread_deinit();
        }));
    }

    for i in 0..writers {
        let engine = engine.clone();
        let shared = shared.clone();
        let stop = stop.clone();
        let writes = writes.clone();
        handles.push(thread::spawn(move || {
            set_cpu_affinity(readers + i);
            engine.thread_init().expect("thread_init");
            let mut counter = 1u64;
            while !stop.load(Ordering::Relaxed) {
                let fresh = Box::into_raw(Box::new(WorkingData { c: counter }));
                // `write_lock`'s ticket lock serializes writers so the
                // read-old/store-new/retire sequence below can't race with
                // another writer and retire the same payload twice.
                let old = {
                    let g = lazy_rcu::write_lock(&engine);
                    shared.assign_locked(&g, fresh)
                };
                lazy_rcu::call(&engine, unsafe { Box::from_raw(old) });
                counter += 1;
                writes.fetch_add(1, Ordering::Relaxed);
                if counter % 10_000 == 0 {
                    info!("writer {} published {} values", i, counter);
                }
            }
            engine.thread_deinit();
        }));
    }

    thread::sleep(Duration::from_secs(seconds));
    stop.store(true, Ordering::Relaxed);
    for h in handles {
        h.join().expect("worker thread panicked");
    }

    info!(
        "done: {} reads, {} writes over {}s",
        reads.load(Ordering::Relaxed),
        writes.load(Ordering::Relaxed),
        seconds
    );

    engine.thread_init().expect("thread_init");
    lazy_rcu::barrier(&engine);
    engine.thread_deinit();
    engine.deinit();
}
