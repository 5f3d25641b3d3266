//! Blocking mutex with direct hand-off (C7): `unlock` transfers ownership
//! straight to the lowest-index waiter instead of merely waking everyone and
//! letting them race for it, so a released mutex never goes back to
//! `Unused` ownership while a task is already queued for it.
use crate::arch::Arch;
use crate::critical::CriticalGuard;
use crate::error::{TryLockError, UnlockError};
use crate::kernel::Kernel;
use crate::tcb::ThreadState;

/// A mutex over no data of its own — like the original, this crate models
/// mutual exclusion as a standalone primitive a task pairs with whatever it
/// protects by convention, not a `Mutex<T>` wrapper.
///
/// The wait set is a plain bitmask rather than a queue, so this type assumes
/// `MAX_THREADS <= 32`; [`Kernel::new_thread`]'s slot count already bounds
/// every index that can appear here.
pub struct Mutex {
    locked: crate::critical::Shared<bool>,
    owner: crate::critical::Shared<Option<usize>>,
    wait_set: crate::critical::Shared<u32>,
}

impl Mutex {
    /// An unlocked mutex with no waiters.
    pub const fn new() -> Self {
        Self {
            locked: crate::critical::Shared::new(false),
            owner: crate::critical::Shared::new(None),
            wait_set: crate::critical::Shared::new(0),
        }
    }

    /// Acquire the mutex, blocking until it is free. Returns immediately if
    /// direct hand-off has already made the calling task the owner.
    pub fn lock<A: Arch, const N: usize>(&self, kernel: &Kernel<A, N>) {
        debug_assert!(N <= 32, "Mutex wait_set bitmask cannot address this many slots");
        loop {
            let acquired = {
                let guard = CriticalGuard::<A>::enter();
                let token = guard.token();
                let current = kernel.current_index.get(&token);

                if !self.locked.get(&token) {
                    self.locked.set(&token, true);
                    self.owner.set(&token, Some(current));
                    true
                } else if self.owner.get(&token) == Some(current) {
                    // Handed off to us while we were asleep between the wait
                    // registration below and this re-check.
                    true
                } else {
                    let mask = self.wait_set.get(&token);
                    self.wait_set.set(&token, mask | (1 << current));
                    kernel.threads[current].modify(&token, |s| s.state = ThreadState::Blocked);

                    #[cfg(feature = "log")]
                    log::trace!("mutex: slot {current} blocked");

                    false
                }
            };

            if acquired {
                return;
            }
            A::request_yield();
        }
    }

    /// Non-blocking acquire: the `Result`-returning counterpart to
    /// [`lock`][Self::lock], returning [`TryLockError::WouldBlock`] instead
    /// of registering as a waiter.
    pub fn try_lock<A: Arch, const N: usize>(
        &self,
        kernel: &Kernel<A, N>,
    ) -> Result<(), TryLockError> {
        let guard = CriticalGuard::<A>::enter();
        let token = guard.token();
        let current = kernel.current_index.get(&token);

        if !self.locked.get(&token) {
            self.locked.set(&token, true);
            self.owner.set(&token, Some(current));
            Ok(())
        } else if self.owner.get(&token) == Some(current) {
            Ok(())
        } else {
            Err(TryLockError::WouldBlock)
        }
    }

    /// Release the mutex. A silent no-op if the calling task does not own
    /// it, matching the original's non-owner-release policy — use
    /// [`try_unlock`][Self::try_unlock] where that case needs surfacing.
    ///
    /// If a task is waiting, ownership transfers directly to the
    /// lowest-index one (hand-off) and the mutex stays logically locked;
    /// otherwise it becomes free.
    pub fn unlock<A: Arch, const N: usize>(&self, kernel: &Kernel<A, N>) {
        let _ = self.try_unlock(kernel);
    }

    /// The `Result`-returning counterpart to [`unlock`][Self::unlock].
    pub fn try_unlock<A: Arch, const N: usize>(
        &self,
        kernel: &Kernel<A, N>,
    ) -> Result<(), UnlockError> {
        let guard = CriticalGuard::<A>::enter();
        let token = guard.token();
        let current = kernel.current_index.get(&token);

        if self.owner.get(&token) != Some(current) {
            return Err(UnlockError::NotOwner);
        }

        let mask = self.wait_set.get(&token);
        if mask == 0 {
            self.locked.set(&token, false);
            self.owner.set(&token, None);
        } else {
            let next = mask.trailing_zeros() as usize;
            self.wait_set.set(&token, mask & !(1 << next));
            self.owner.set(&token, Some(next));
            kernel.threads[next].modify(&token, |s| s.state = ThreadState::Ready);

            #[cfg(feature = "log")]
            log::trace!("mutex: handed off from {current} to {next}");
        }

        Ok(())
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: identical reasoning to `Kernel`'s — every field is a `Shared<T>`,
// only ever touched through a `CriticalToken`.
unsafe impl Sync for Mutex {}
