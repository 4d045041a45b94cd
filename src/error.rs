//! Definition of the engine's error/status kinds.
//!
//! Policy (spec §7): programmer-contract violations (`UnknownNamespace`,
//! `NotRegistered`, `NestedWriter`, `CounterUnderflow`) are fatal
//! assertions on the hot paths and never reach this enum. Resource
//! exhaustion (`OutOfMemory`, `WorkerStartFailed`, `ThreadNumOverflow`,
//! `Exists`) is returned from constructor-like APIs instead of panicking.

use std::fmt;

/// Status returned by the engine's fallible, constructor-like APIs.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Status {
    /// Operation completed normally.
    Success,
    /// A namespace id already has a namespace bound to it.
    Exists,
    /// No namespace is bound at the given id.
    UnknownNamespace,
    /// Allocation failed.
    OutOfMemory,
    /// The reclamation worker thread could not be spawned.
    WorkerStartFailed,
    /// `MAX_THREAD_COUNT`/`THREADS_MAX` threads are already registered.
    ThreadNumOverflow,
    /// A parameter failed validation.
    InvalidParam,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Status {}

#[cfg(test)]
mod tests {
    use super::Status;

    #[test]
    fn displays_as_debug_name() {
        assert_eq!(format!("{}", Status::Success), "Success");
        assert_eq!(format!("{}", Status::UnknownNamespace), "UnknownNamespace");
    }
}
