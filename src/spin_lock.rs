//! A fair ticket spinlock (spec §6: "Provided by ticket-spinlock
//! primitive: `lock`, `unlock`, `trylock`, `lockable` on a 32-bit two-u16
//! word"), ported from `examples/original_source/src/spinlock.c`.
//!
//! Unlike a bare CAS spinlock, a ticket lock grants the lock in FIFO order:
//! each locker draws a ticket by fetch-adding `users`, then spins until
//! `ticket` (bumped by the unlocker) matches its own. This is required by
//! spec §5/§9: writer contention within a namespace must be fair.
use crate::util;
use std::sync::atomic::{AtomicU32, Ordering};

const USERS_SHIFT: u32 = 0;
const TICKET_SHIFT: u32 = 16;
const HALF_MASK: u32 = 0xffff;

#[inline]
fn pack(ticket: u16, users: u16) -> u32 {
    ((ticket as u32) << TICKET_SHIFT) | ((users as u32) << USERS_SHIFT)
}

#[inline]
fn unpack(word: u32) -> (u16, u16) {
    (((word >> TICKET_SHIFT) & HALF_MASK) as u16, ((word >> USERS_SHIFT) & HALF_MASK) as u16)
}

/// A ticket spinlock, packed into one 32-bit word (`{ticket: u16, users:
/// u16}`) exactly as in the original. `Sync`, usable behind a shared
/// reference — unlike the teacher's `SpinLock`, which serialized access
/// through `&mut self`, a lock primitive's whole point is to hand out
/// exclusive access from `&self`.
pub struct SpinLock {
    word: AtomicU32,
}

impl Default for SpinLock {
    fn default() -> Self {
        SpinLock::new()
    }
}

impl SpinLock {
    pub const fn new() -> Self {
        SpinLock {
            word: AtomicU32::new(0),
        }
    }

    /// Keep trying to lock until success.
    pub fn lock(&self) {
        let me = ((self.word.fetch_add(1 << USERS_SHIFT, Ordering::Relaxed) >> USERS_SHIFT)
            & HALF_MASK) as u16;
        loop {
            let (ticket, _users) = unpack(self.word.load(Ordering::Acquire));
            if ticket == me {
                return;
            }
            util::pause();
        }
    }

    /// Keep trying to lock until success, then return a guard that unlocks
    /// on drop.
    pub fn lock_guard(&self) -> SpinLockGuard<'_> {
        self.lock();
        SpinLockGuard { lock: self }
    }

    /// Release a held lock. Panics if the lock is not currently held by
    /// anyone, mirroring the teacher's `assert!(self.is_locked())` guard.
    pub fn unlock(&self) {
        assert!(self.is_locked());
        self.word.fetch_add(1 << TICKET_SHIFT, Ordering::Release);
    }

    /// True if some caller currently holds the lock.
    pub fn is_locked(&self) -> bool {
        let (ticket, users) = unpack(self.word.load(Ordering::Acquire));
        ticket != users
    }

    /// Attempt to take the lock without blocking. Only succeeds when there
    /// is no queue of waiters ahead of the new ticket, via a single CAS on
    /// the packed word (matches `lrcu_spin_trylock`).
    pub fn try_lock(&self) -> bool {
        let old = self.word.load(Ordering::Acquire);
        let (ticket, users) = unpack(old);
        if ticket != users {
            return false;
        }
        let new = pack(ticket, users.wrapping_add(1));
        self.word
            .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// True iff a fresh `lock()` call would not have to wait behind anyone.
    pub fn lockable(&self) -> bool {
        !self.is_locked()
    }
}

/// RAII guard returned by [`SpinLock::lock_guard`]; unlocks on drop.
pub struct SpinLockGuard<'a> {
    lock: &'a SpinLock,
}

impl<'a> Drop for SpinLockGuard<'a> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
