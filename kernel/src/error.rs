//! Typed error surface. Every fallible operation gets its own small `Copy`
//! enum instead of a bare `bool` or a silently swallowed no-op, in the same
//! one-marker-enum-per-failure-family style the rest of the ecosystem uses
//! for `no_std` kernels.

/// Returned by the inner thread constructor when every non-bootstrap slot
/// is occupied. The public [`Kernel::new_thread`](crate::Kernel::new_thread)
/// collapses this to `None` per the task-facing API, which only ever needs
/// to distinguish "created" from "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewThreadError {
    /// No `UNUSED` slot was found in `1..MAX_THREADS`.
    NoFreeSlot,
}

/// Returned by [`Mutex::try_lock`](crate::mutex::Mutex::try_lock) when the
/// mutex is already held by another task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryLockError {
    WouldBlock,
}

/// Returned by [`Mutex::try_unlock`](crate::mutex::Mutex::try_unlock), the
/// fallible counterpart to the public `unlock()`, which stays a silent no-op
/// per the non-owner-release policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockError {
    /// The calling task does not own the mutex.
    NotOwner,
}

/// Returned by [`Kernel::init`](crate::Kernel::init) on a second call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    AlreadyInitialized,
}
