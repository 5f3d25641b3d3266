//! Task-facing API (C6): the operations a task calls on itself from inside
//! its own entry function. Everything here just edits the calling task's own
//! [`TcbState`](crate::tcb::TcbState) and hands off to
//! [`Arch::request_yield`], which is responsible for actually invoking
//! [`context_switch`](crate::sched::context_switch) and swapping the real
//! stack pointer — the one piece of the dispatch path that lives in the
//! architecture port, outside this crate.
use crate::arch::Arch;
use crate::critical::CriticalGuard;
use crate::kernel::Kernel;
use crate::tcb::ThreadState;

/// Give up the remainder of the current time slice voluntarily. The calling
/// task is marked `Ready` and control does not return here until the
/// scheduler picks it again.
pub fn yield_now<A: Arch, const N: usize>(kernel: &Kernel<A, N>) {
    {
        let guard = CriticalGuard::<A>::enter();
        let token = guard.token();
        let current = kernel.current_index.get(&token);
        kernel.threads[current].modify(&token, |s| s.state = ThreadState::Ready);
    }
    A::request_yield();
}

/// Suspend the calling task until at least `ms` ticks have elapsed (§4.3,
/// §6). `ms == 0` still yields once: the task becomes eligible again on the
/// very next sweep, behaving like [`yield_now`] with one extra scheduling
/// pass, not an immediate no-op.
pub fn sleep<A: Arch, const N: usize>(kernel: &Kernel<A, N>, ms: u32) {
    {
        let guard = CriticalGuard::<A>::enter();
        let token = guard.token();
        let current = kernel.current_index.get(&token);
        let now = kernel.sys_ticks.get(&token);
        kernel.threads[current].modify(&token, |s| {
            s.state = ThreadState::Sleep;
            s.wake_time = now.wrapping_add(ms);
        });

        #[cfg(feature = "log")]
        log::trace!("sleep: slot {current} until tick {}", now.wrapping_add(ms));
    }
    A::request_yield();
}

/// Does the calling task's own stack sentinel still read intact? A
/// thin, self-directed wrapper over [`Kernel::is_corrupted`] kept here
/// because it is conceptually part of the task-facing surface (§4.4).
pub fn is_corrupted<A: Arch, const N: usize>(kernel: &Kernel<A, N>) -> bool {
    kernel.is_corrupted()
}

/// Retire the calling task: free its slot so [`Kernel::new_thread`] can
/// reuse it, and yield away for good. Invoked by the exit trampoline address
/// every task is created with (§4.2), when its entry function returns
/// normally; not meant to be called mid-task.
///
/// Never returns: once a task is `Unused` the scheduler will not select it
/// again, so the loop below only exists to keep calling `request_yield`
/// until that happens.
pub fn retire_current_task<A: Arch, const N: usize>(kernel: &Kernel<A, N>) -> ! {
    free_current_slot(kernel);
    loop {
        A::request_yield();
    }
}

fn free_current_slot<A: Arch, const N: usize>(kernel: &Kernel<A, N>) {
    let guard = CriticalGuard::<A>::enter();
    let token = guard.token();
    let current = kernel.current_index.get(&token);
    kernel.threads[current].modify(&token, |s| {
        s.state = ThreadState::Unused;
        s.stack_base = None;
        s.stack_size = 0;
    });

    #[cfg(feature = "log")]
    log::debug!("retire_current_task: slot {current} unused");
}

/// Current tick count (§4.3 step 2, §8 scenario 6). A thin wrapper over
/// [`Kernel::get_ticks`] grouped here as part of the task-facing surface.
pub fn get_ticks<A: Arch, const N: usize>(kernel: &Kernel<A, N>) -> u32 {
    kernel.get_ticks()
}

/// Count of non-`Unused` slots. A thin wrapper over
/// [`Kernel::get_active_threads`].
pub fn get_active_threads<A: Arch, const N: usize>(kernel: &Kernel<A, N>) -> usize {
    kernel.get_active_threads()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::critical::CriticalGuard;
    use crate::testutil::TestArch;

    #[test]
    fn yield_now_marks_current_ready() {
        let kernel: Kernel<TestArch, 2> = Kernel::new();
        kernel.init(20, 0).unwrap();
        yield_now(&kernel);

        let guard = CriticalGuard::<TestArch>::enter();
        let token = guard.token();
        assert_eq!(kernel.threads[0].read(&token).state, ThreadState::Ready);
    }

    #[test]
    fn sleep_sets_wake_time_from_current_ticks() {
        let kernel: Kernel<TestArch, 2> = Kernel::new();
        kernel.init(20, 0).unwrap();
        sleep(&kernel, 50);

        let guard = CriticalGuard::<TestArch>::enter();
        let token = guard.token();
        let state = kernel.threads[0].read(&token);
        assert_eq!(state.state, ThreadState::Sleep);
        assert_eq!(state.wake_time, 50);
    }

    #[test]
    fn free_current_slot_clears_stack_bookkeeping() {
        let kernel: Kernel<TestArch, 2> = Kernel::new();
        kernel.init(20, 0).unwrap();
        free_current_slot(&kernel);

        let guard = CriticalGuard::<TestArch>::enter();
        let token = guard.token();
        let state = kernel.threads[0].read(&token);
        assert_eq!(state.state, ThreadState::Unused);
        assert_eq!(state.stack_base, None);
    }
}
