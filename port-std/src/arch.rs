//! [`Arch`] implementation for running `corelet_kernel` on a desktop OS,
//! simulating its single-core interrupt-masking contract with a shared
//! global flag and its preemptive dispatch with a thread park/unpark
//! turnstile (see [`crate::runtime`]).
use std::sync::atomic::{AtomicBool, Ordering};

use corelet_kernel::Arch;

static INTERRUPTS_ENABLED: AtomicBool = AtomicBool::new(true);

/// The host simulation's [`Arch`]. At any moment exactly one simulated task
/// is ever running (every other one is parked by [`crate::runtime::Runtime`]),
/// so a single process-wide flag models the target's global interrupt
/// enable faithfully: there is no real concurrent access to it to race
/// against, only the same single-threaded-at-a-time discipline the kernel
/// itself assumes.
pub struct HostArch;

unsafe impl Arch for HostArch {
    fn disable_interrupts() -> bool {
        INTERRUPTS_ENABLED.swap(false, Ordering::SeqCst)
    }

    unsafe fn restore_interrupts(was_enabled: bool) {
        INTERRUPTS_ENABLED.store(was_enabled, Ordering::SeqCst);
    }

    fn request_yield() {
        crate::runtime::dispatch();
    }
}
