//! Compile-time sizing and runtime timing knobs (spec §6).
//!
//! `NS_MAX` and `THREADS_MAX` size fixed arrays and therefore stay
//! compile-time constants, selected with `cfg_if!` the same way the
//! teacher crate selects `MAX_THREAD_COUNT` through its
//! `max_thread_count_*` features. The three timing knobs
//! (`worker_period`, `sync_timeout`, `hang_timeout`) were per-handler
//! runtime parameters in the original implementation, so they become
//! fields on [`LrcuConfig`] instead.
use std::time::Duration;

/// Capacity of the namespace table (`NS_MAX` in spec §6).
pub const NS_MAX: usize = 256;

cfg_if::cfg_if! {
    if #[cfg(feature = "threads_max_4096")] {
        /// Upper bound on simultaneously registered threads (`THREADS_MAX`).
        pub const THREADS_MAX: usize = 4096;
    } else if #[cfg(feature = "threads_max_256")] {
        pub const THREADS_MAX: usize = 256;
    } else if #[cfg(feature = "threads_max_16")] {
        pub const THREADS_MAX: usize = 16;
    } else {
        pub const THREADS_MAX: usize = 128;
    }
}

/// Default namespace id used by the unsuffixed convenience methods.
pub const NS_DEFAULT: u8 = 0;

/// Runtime timing knobs for one [`crate::Lrcu`] engine.
///
/// Defaults match spec §6's table: 50µs worker pass period, 100µs
/// synchronize/barrier poll granularity, 600s hang-reader threshold (note:
/// spec §4.3's prose default of "60s" is superseded by the §6 table, which
/// this crate treats as authoritative — see `DESIGN.md`).
#[derive(Clone, Copy, Debug)]
pub struct LrcuConfig {
    /// How long the reclamation worker sleeps between passes.
    pub worker_period: Duration,
    /// Poll granularity inside `synchronize`/`barrier`.
    pub sync_timeout: Duration,
    /// Threshold after which a still-in-section reader is classified hung.
    pub hang_timeout: Duration,
}

impl Default for LrcuConfig {
    fn default() -> Self {
        LrcuConfig {
            worker_period: Duration::from_micros(50),
            sync_timeout: Duration::from_micros(100),
            hang_timeout: Duration::from_secs(600),
        }
    }
}
