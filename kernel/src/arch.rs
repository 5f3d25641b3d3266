//! The architecture port boundary.
//!
//! Everything in this crate outside this module is portable: it only
//! inspects and rewrites [`crate::tcb::Tcb`] state and never touches a
//! register or an interrupt controller directly. The two places where the
//! scheduler genuinely needs to know something about the target are masking
//! interrupts around a critical section and laying out the byte frame a
//! freshly created task's stack starts with. Both are captured here as a
//! single trait so that porting to a new target means writing one `impl
//! Arch`, not patching the scheduler.
//!
//! This crate ships no production [`Arch`] implementation — the real one
//! lives alongside the register-save/restore trampoline and the timer setup
//! for a given board, which are outside this crate's scope. `corelet_port_std`
//! provides a hosted one for testing.

/// Isolates the handful of operations that differ between targets.
///
/// # Safety
///
/// Implementors must ensure [`disable_interrupts`](Arch::disable_interrupts)
/// and [`restore_interrupts`](Arch::restore_interrupts) really do mask and
/// unmask the timer interrupt that drives preemption, with no window in
/// which the scheduler can be re-entered. Getting this wrong reintroduces
/// exactly the race the critical-section guard exists to close.
pub unsafe trait Arch {
    /// Disable the global interrupt enable and report whether it was set
    /// beforehand. Must be callable when interrupts are already disabled
    /// (in which case it returns `false` and is a no-op).
    fn disable_interrupts() -> bool;

    /// Restore the global interrupt enable to exactly the state reported by
    /// a prior [`disable_interrupts`](Arch::disable_interrupts) call.
    ///
    /// # Safety
    ///
    /// `was_enabled` must be a value previously returned by
    /// `disable_interrupts`, used to leave a matching critical section.
    unsafe fn restore_interrupts(was_enabled: bool);

    /// Force an immediate, synchronous dispatch, as if the preemption timer
    /// had just fired. Used by `yield_now`, and internally by `sleep`,
    /// `Mutex::lock`, and task exit.
    fn request_yield();

    /// Bytes occupied by one fabricated initial stack frame, as produced by
    /// [`write_initial_frame`](Arch::write_initial_frame). The default is the
    /// little-endian 8-bit layout described in this crate's top-level
    /// documentation: a 2-byte exit address, a 2-byte entry address, one
    /// byte standing in for the first general-purpose register, one status
    /// register byte, and 31 more zeroed general-purpose register bytes.
    const REGISTER_FRAME_BYTES: usize = 37;

    /// Fabricate the initial register frame for a new task at the top of
    /// `stack`, so that a single return-from-interrupt restores it straight
    /// into `entry` with interrupts enabled, and a normal return from `entry`
    /// lands in `exit`.
    ///
    /// Returns the byte offset (from the start of `stack`) at which the
    /// task's saved stack pointer should point.
    ///
    /// The default implementation matches [`REGISTER_FRAME_BYTES`] and is
    /// suitable for any little-endian target with a 16-bit program counter
    /// and an 8-bit status register; override both together for a different
    /// register file.
    ///
    /// [`REGISTER_FRAME_BYTES`]: Arch::REGISTER_FRAME_BYTES
    fn write_initial_frame(stack: &mut [u8], entry: usize, exit: usize) -> usize {
        crate::stack::write_default_frame(stack, entry, exit)
    }
}
