//! Kernel lifecycle (C8) and the fixed-size thread table (C2) it owns.
use crate::arch::Arch;
use crate::critical::{CriticalGuard, Shared};
use crate::error::{InitError, NewThreadError};
use crate::stack::build_initial_frame;
use crate::tcb::{Tcb, TcbState, ThreadState};

/// A task entry point: a plain function taking no arguments, expected to
/// return normally when the task is done (control then flows to the exit
/// trampoline supplied to [`Kernel::init`]).
pub type TaskFn = extern "C" fn();

/// A non-owning reference to a live task slot, returned by
/// [`Kernel::new_thread`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadHandle(pub(crate) usize);

impl ThreadHandle {
    /// The slot index this handle refers to.
    pub fn index(self) -> usize {
        self.0
    }
}

/// The kernel: a fixed `MAX_THREADS`-slot thread table, the tick counter,
/// and the bookkeeping needed to dispatch between them.
///
/// `MAX_THREADS` is a const generic so the table is a plain array with no
/// allocation, matching "the kernel does not allocate" (§1 Out of scope).
/// Slot `0` is always the bootstrap task: the flow of control that called
/// [`Kernel::init`], continuing to run on its pre-existing stack.
pub struct Kernel<A: Arch, const MAX_THREADS: usize> {
    pub(crate) threads: [Tcb; MAX_THREADS],
    pub(crate) current_index: Shared<usize>,
    pub(crate) sys_ticks: Shared<u32>,
    time_slice_ms: Shared<u32>,
    exit_trampoline: Shared<usize>,
    initialized: Shared<bool>,
    _arch: core::marker::PhantomData<A>,
}

impl<A: Arch, const MAX_THREADS: usize> Default for Kernel<A, MAX_THREADS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Arch, const MAX_THREADS: usize> Kernel<A, MAX_THREADS> {
    /// Construct a kernel in its pre-`init` state. `MAX_THREADS` must be at
    /// least 1 (the bootstrap slot); a 0-thread kernel can schedule nothing.
    pub fn new() -> Self {
        assert!(MAX_THREADS >= 1, "MAX_THREADS must reserve slot 0");
        Self {
            threads: core::array::from_fn(|_| Tcb::new()),
            current_index: Shared::new(0),
            sys_ticks: Shared::new(0),
            time_slice_ms: Shared::new(0),
            exit_trampoline: Shared::new(0),
            initialized: Shared::new(false),
            _arch: core::marker::PhantomData,
        }
    }

    /// Boot the kernel (C8). Must be called exactly once, before any
    /// [`new_thread`][Self::new_thread], from the flow of control that will
    /// become the bootstrap task.
    ///
    /// `time_slice_ms` is the period the caller has programmed the
    /// preemption timer for; `exit_trampoline` is the address embedded in
    /// every subsequently created task's initial frame as the address
    /// control flows to when the task function returns (§4.2). Programming
    /// the timer itself and enabling the global interrupt are the caller's
    /// responsibility (outside this crate's scope, per §1); this method only
    /// records the tick period and resets kernel state.
    pub fn init(&self, time_slice_ms: u32, exit_trampoline: usize) -> Result<(), InitError> {
        let guard = CriticalGuard::<A>::enter();
        let token = guard.token();

        if self.initialized.get(&token) {
            return Err(InitError::AlreadyInitialized);
        }

        self.threads[0].write(&token, TcbState::BOOTSTRAP);
        for tcb in &self.threads[1..] {
            tcb.write(&token, TcbState::UNUSED);
        }
        self.current_index.set(&token, 0);
        self.sys_ticks.set(&token, 0);
        self.time_slice_ms.set(&token, time_slice_ms);
        self.exit_trampoline.set(&token, exit_trampoline);
        self.initialized.set(&token, true);

        Ok(())
    }

    #[inline]
    pub(crate) fn time_slice_ms(&self) -> u32 {
        let guard = CriticalGuard::<A>::enter();
        self.time_slice_ms.get(&guard.token())
    }

    /// Read `time_slice_ms` given a token for a critical section the caller
    /// already holds, avoiding a redundant nested [`CriticalGuard`].
    #[inline]
    pub(crate) fn time_slice_ms_locked(&self, token: &crate::critical::CriticalToken<'_>) -> u32 {
        self.time_slice_ms.get(token)
    }

    /// Create a task. Scans slots `1..MAX_THREADS` for the first `Unused`
    /// one; `stack` becomes that task's managed buffer for the rest of its
    /// lifetime (the kernel never frees it — the caller owns it and must
    /// outlive the task).
    ///
    /// Returns `None` if every non-bootstrap slot is occupied.
    pub fn new_thread(&self, entry: TaskFn, stack: &'static mut [u8]) -> Option<ThreadHandle> {
        match self.try_new_thread(entry, stack) {
            Ok(handle) => Some(handle),
            Err(NewThreadError::NoFreeSlot) => None,
        }
    }

    /// The `Result`-returning inner form of [`new_thread`][Self::new_thread].
    pub fn try_new_thread(
        &self,
        entry: TaskFn,
        stack: &'static mut [u8],
    ) -> Result<ThreadHandle, NewThreadError> {
        let guard = CriticalGuard::<A>::enter();
        let token = guard.token();

        let exit = self.exit_trampoline.get(&token);

        for (index, tcb) in self.threads.iter().enumerate().skip(1) {
            if tcb.read(&token).state == ThreadState::Unused {
                let stack_base = stack.as_ptr() as usize;
                let stack_size = stack.len();
                let stack_pointer = build_initial_frame::<A>(stack, entry as usize, exit);

                tcb.write(
                    &token,
                    TcbState {
                        stack_pointer,
                        stack_base: Some(stack_base),
                        stack_size,
                        wake_time: 0,
                        state: ThreadState::Ready,
                    },
                );

                #[cfg(feature = "log")]
                log::debug!("new_thread: slot {index} ready");

                return Ok(ThreadHandle(index));
            }
        }

        Err(NewThreadError::NoFreeSlot)
    }

    /// Read `sys_ticks`. Performed inside a critical section so the 32-bit
    /// value can never be observed torn (§8 scenario 6).
    pub fn get_ticks(&self) -> u32 {
        let guard = CriticalGuard::<A>::enter();
        self.sys_ticks.get(&guard.token())
    }

    /// Count non-`Unused` slots.
    pub fn get_active_threads(&self) -> usize {
        let guard = CriticalGuard::<A>::enter();
        let token = guard.token();
        self.threads
            .iter()
            .filter(|tcb| tcb.read(&token).state != ThreadState::Unused)
            .count()
    }

    /// Index of the currently running task.
    pub fn current_index(&self) -> usize {
        let guard = CriticalGuard::<A>::enter();
        self.current_index.get(&guard.token())
    }

    /// The scheduling state of slot `index`, e.g. for a host port to notice
    /// that the task it is carrying has just retired.
    ///
    /// # Panics
    ///
    /// Panics if `index >= MAX_THREADS`.
    pub fn thread_state(&self, index: usize) -> ThreadState {
        let guard = CriticalGuard::<A>::enter();
        self.threads[index].read(&guard.token()).state
    }

    /// Does the current task's stack sentinel still read
    /// [`crate::tcb::STACK_SENTINEL`]? Always `false` for the bootstrap task.
    pub fn is_corrupted(&self) -> bool {
        let guard = CriticalGuard::<A>::enter();
        let token = guard.token();
        let current = self.current_index.get(&token);
        !self.threads[current].sentinel_intact(&token)
    }

    /// Manually disable interrupts, returning the prior enabled state.
    pub fn enter_critical(&self) -> bool {
        crate::critical::enter_critical::<A>()
    }

    /// Manually restore interrupts to a state returned by
    /// [`enter_critical`][Self::enter_critical].
    ///
    /// # Safety
    ///
    /// `was_enabled` must be the value that the matching `enter_critical`
    /// call returned.
    pub unsafe fn exit_critical(&self, was_enabled: bool) {
        unsafe { crate::critical::exit_critical::<A>(was_enabled) };
    }
}

// Safety: every field is either `Shared<T>` (already `Sync` by its own
// discipline) or a fixed-size array of `Tcb` (ditto); there is no data here
// that is sound to access without holding a `CriticalToken`, and nothing in
// this module hands one out without going through `CriticalGuard::enter`.
unsafe impl<A: Arch, const MAX_THREADS: usize> Sync for Kernel<A, MAX_THREADS> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NewThreadError;
    use crate::testutil::TestArch;

    extern "C" fn dummy_entry() {}

    #[test]
    fn init_sets_slot_zero_running_and_rest_unused() {
        let kernel: Kernel<TestArch, 3> = Kernel::new();
        kernel.init(20, 0xBEEF).unwrap();

        let guard = CriticalGuard::<TestArch>::enter();
        let token = guard.token();
        assert_eq!(kernel.threads[0].read(&token).state, ThreadState::Running);
        assert_eq!(kernel.threads[1].read(&token).state, ThreadState::Unused);
        assert_eq!(kernel.threads[2].read(&token).state, ThreadState::Unused);
        assert_eq!(kernel.current_index.get(&token), 0);
    }

    #[test]
    fn init_twice_is_rejected() {
        let kernel: Kernel<TestArch, 2> = Kernel::new();
        kernel.init(20, 0).unwrap();
        assert_eq!(kernel.init(20, 0), Err(InitError::AlreadyInitialized));
    }

    #[test]
    fn new_thread_fills_slots_in_order_then_errors() {
        let kernel: Kernel<TestArch, 3> = Kernel::new();
        kernel.init(20, 0).unwrap();

        static mut STACK_A: [u8; 64] = [0; 64];
        static mut STACK_B: [u8; 64] = [0; 64];
        static mut STACK_C: [u8; 64] = [0; 64];

        let a = kernel
            .new_thread(dummy_entry, unsafe { &mut *core::ptr::addr_of_mut!(STACK_A) })
            .unwrap();
        let b = kernel
            .new_thread(dummy_entry, unsafe { &mut *core::ptr::addr_of_mut!(STACK_B) })
            .unwrap();
        assert_eq!(a.index(), 1);
        assert_eq!(b.index(), 2);

        assert_eq!(
            kernel.try_new_thread(dummy_entry, unsafe { &mut *core::ptr::addr_of_mut!(STACK_C) }),
            Err(NewThreadError::NoFreeSlot)
        );
    }

    #[test]
    fn get_active_threads_counts_bootstrap_and_new_tasks() {
        let kernel: Kernel<TestArch, 3> = Kernel::new();
        kernel.init(20, 0).unwrap();
        assert_eq!(kernel.get_active_threads(), 1);

        static mut STACK: [u8; 64] = [0; 64];
        kernel
            .new_thread(dummy_entry, unsafe { &mut *core::ptr::addr_of_mut!(STACK) })
            .unwrap();
        assert_eq!(kernel.get_active_threads(), 2);
    }

    #[test]
    fn thread_state_reflects_slot_contents() {
        let kernel: Kernel<TestArch, 2> = Kernel::new();
        kernel.init(20, 0).unwrap();
        assert_eq!(kernel.thread_state(0), ThreadState::Running);
        assert_eq!(kernel.thread_state(1), ThreadState::Unused);
    }

    #[test]
    fn bootstrap_task_is_never_corrupted() {
        let kernel: Kernel<TestArch, 1> = Kernel::new();
        kernel.init(20, 0).unwrap();
        assert!(!kernel.is_corrupted());
    }

    #[test]
    fn is_corrupted_detects_a_clobbered_sentinel() {
        let kernel: Kernel<TestArch, 2> = Kernel::new();
        kernel.init(20, 0).unwrap();

        static mut STACK: [u8; 37] = [0; 37];
        let handle = kernel
            .new_thread(dummy_entry, unsafe { &mut *core::ptr::addr_of_mut!(STACK) })
            .unwrap();

        {
            let guard = CriticalGuard::<TestArch>::enter();
            let token = guard.token();
            kernel.current_index.set(&token, handle.index());
        }
        assert!(!kernel.is_corrupted());

        unsafe {
            core::ptr::addr_of_mut!(STACK).cast::<u8>().write_volatile(0);
        }
        assert!(kernel.is_corrupted());
    }
}
