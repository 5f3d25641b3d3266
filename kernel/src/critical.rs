//! Critical-section guard and the proof-token discipline used to access
//! state that is shared between task context and the scheduler.
//!
//! A [`CriticalGuard`] disables the target's global interrupt enable for its
//! lifetime and restores the prior state — not unconditionally re-enabling —
//! when dropped, so that accidental nesting degrades gracefully instead of
//! re-enabling interrupts a nested caller still expected masked. This is
//! deliberately *not* reentrant-counted; the minimal design only needs one
//! level, and a target that needs more can wrap [`Arch::disable_interrupts`]
//! itself.
//!
//! Every piece of kernel state that is written from both task context and
//! the scheduler is wrapped in [`Shared`], which only yields its contents in
//! exchange for a [`CriticalToken`] — obtainable solely by holding a
//! `CriticalGuard`. This mirrors the teacher's CPU-Lock-token pattern, just
//! without the singleton-token machinery a multi-priority kernel needs: one
//! guard in scope is all there ever is on a single core with no nesting.
use core::cell::UnsafeCell;
use core::marker::PhantomData;

use crate::arch::Arch;

/// Proof that interrupts are currently disabled. Zero-sized; its only
/// purpose is to be required by [`Shared::get`]/[`Shared::set`]/
/// [`Shared::with_mut`] so that those can't be called outside a critical
/// section.
pub struct CriticalToken<'g> {
    _guard: PhantomData<&'g ()>,
}

/// RAII guard for a critical section. Disables interrupts on construction,
/// restores the previous state on drop.
pub struct CriticalGuard<A: Arch> {
    prev_enabled: bool,
    _arch: PhantomData<A>,
}

impl<A: Arch> CriticalGuard<A> {
    /// Enter a critical section.
    #[inline]
    pub fn enter() -> Self {
        let prev_enabled = A::disable_interrupts();
        Self {
            prev_enabled,
            _arch: PhantomData,
        }
    }

    /// Borrow the token that unlocks [`Shared`] cells for the lifetime of
    /// this guard.
    #[inline]
    pub fn token(&self) -> CriticalToken<'_> {
        CriticalToken {
            _guard: PhantomData,
        }
    }
}

impl<A: Arch> Drop for CriticalGuard<A> {
    #[inline]
    fn drop(&mut self) {
        // Safety: `prev_enabled` came from the matching `disable_interrupts`
        // call in `enter`.
        unsafe { A::restore_interrupts(self.prev_enabled) };
    }
}

/// Manually disable interrupts, returning the prior enabled state. Prefer
/// [`CriticalGuard`] unless the acquire/release points genuinely don't nest
/// as a lexical scope (see [`crate::Kernel::enter_critical`]).
#[inline]
pub fn enter_critical<A: Arch>() -> bool {
    A::disable_interrupts()
}

/// Manually restore interrupts to the state reported by a matching
/// [`enter_critical`].
///
/// # Safety
///
/// `was_enabled` must be the value `enter_critical` returned for the
/// critical section being closed.
#[inline]
pub unsafe fn exit_critical<A: Arch>(was_enabled: bool) {
    unsafe { A::restore_interrupts(was_enabled) };
}

/// A cell whose contents may only be read or written while holding a
/// [`CriticalToken`], i.e. from inside a critical section.
///
/// # Safety
///
/// `Shared<T>` is `Sync` regardless of `T` because the kernel's own
/// discipline — never touching the contents outside a critical section — is
/// what makes concurrent access from task context and the scheduler sound,
/// not anything the type system can check on its own. The token parameter
/// only catches *forgetting* to take a critical section; it does not prove
/// mutual exclusion by itself.
pub struct Shared<T>(UnsafeCell<T>);

// Safety: see the type-level doc comment above.
unsafe impl<T> Sync for Shared<T> {}

impl<T> Shared<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    #[inline]
    pub fn get(&self, _token: &CriticalToken<'_>) -> T
    where
        T: Copy,
    {
        // Safety: holding `CriticalToken` proves the caller is inside a
        // critical section, so no concurrent writer (ISR or other task) can
        // observe or produce a torn read.
        unsafe { *self.0.get() }
    }

    #[inline]
    pub fn set(&self, _token: &CriticalToken<'_>, value: T) {
        // Safety: see `get`.
        unsafe { *self.0.get() = value };
    }

    #[inline]
    pub fn with_mut<R>(&self, _token: &CriticalToken<'_>, f: impl FnOnce(&mut T) -> R) -> R {
        // Safety: see `get`.
        unsafe { f(&mut *self.0.get()) }
    }
}
