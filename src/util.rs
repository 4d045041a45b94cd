//! Small helpers shared across the crate: thread ids, cache-line alignment,
//! and the monotonic-ish microsecond clock used for hang-timeout bookkeeping.
extern crate time;

use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI64, Ordering};

static GLOBAL_THREAD_ID: AtomicI64 = AtomicI64::new(0);

/// Process-unique, small, stable thread index. Used to index fixed-size
/// per-thread arrays, the way the teacher's `ThreadStore` table does.
pub fn get_thread_id() -> i64 {
    thread_local!(static THREAD_ID: Cell<i64> = Cell::new(-1));
    THREAD_ID.with(|tid| {
        if tid.get() == -1 {
            tid.set(GLOBAL_THREAD_ID.fetch_add(1, Ordering::Relaxed));
        }
        tid.get()
    })
}

/// Wraps `T` and pads it out to a 64 byte cache line, to keep frequently
/// written fields (version counters, queue heads) from false-sharing with
/// their neighbors.
#[repr(align(64))]
pub struct WrappedAlign64Type<T>(pub T);

impl<T: Default> Default for WrappedAlign64Type<T> {
    fn default() -> Self {
        WrappedAlign64Type(T::default())
    }
}

impl<T> Deref for WrappedAlign64Type<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for WrappedAlign64Type<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// Microsecond-granularity wall clock, used for the hang-reader timer and
/// the minimum-version cache. Matches `get_cur_microseconds_time` in the
/// teacher crate.
pub fn get_cur_microseconds_time() -> i64 {
    let t = time::get_time();
    t.sec * 1_000_000 + i64::from(t.nsec) / 1_000
}

#[inline]
pub fn pause() {
    std::hint::spin_loop();
}
