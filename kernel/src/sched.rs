//! The scheduler core (C4): sleep sweep, round-robin selection, and the
//! state transitions a context switch performs between them.
use crate::arch::Arch;
use crate::critical::{CriticalGuard, CriticalToken};
use crate::kernel::Kernel;
use crate::tcb::ThreadState;

/// Wake every `Sleep` task whose `wake_time` has arrived. Runs before
/// selection on every context switch (§4.3 step 3), so a task woken this
/// tick is eligible to be chosen this same switch.
fn sleep_sweep<A: Arch, const N: usize>(kernel: &Kernel<A, N>, token: &CriticalToken<'_>) {
    let now = kernel.sys_ticks.get(token);
    for tcb in &kernel.threads {
        tcb.modify(token, |s| {
            if s.state == ThreadState::Sleep && now >= s.wake_time {
                s.state = ThreadState::Ready;
            }
        });
    }
}

/// Round-robin search for the next runnable slot, starting just after
/// `current` and wrapping around, per §4.3 step 4. Returns `None` if no
/// slot other than `current` is `Ready`.
fn select_next<A: Arch, const N: usize>(
    kernel: &Kernel<A, N>,
    token: &CriticalToken<'_>,
    current: usize,
) -> Option<usize> {
    for offset in 1..=N {
        let index = (current + offset) % N;
        if index == current {
            continue;
        }
        if kernel.threads[index].read(token).state == ThreadState::Ready {
            return Some(index);
        }
    }
    None
}

/// Entry point invoked by the architecture-specific trampoline at every
/// preemption tick and every cooperative yield: `old_sp` is the stack
/// pointer the caller saved for the task that was just interrupted (or that
/// just called [`yield_now`][crate::thread::yield_now]), and the returned
/// value is the stack pointer the trampoline should restore to resume
/// whichever task the scheduler picked next. Runs the full C4/C5 algorithm
/// in one critical section, so a concurrent interrupt can never observe the
/// thread table mid-switch.
pub fn context_switch<A: Arch, const N: usize>(kernel: &Kernel<A, N>, old_sp: usize) -> usize {
    let guard = CriticalGuard::<A>::enter();
    let token = guard.token();

    let current = kernel.current_index.get(&token);

    // 1. Save the interrupted task's stack pointer.
    kernel.threads[current].modify(&token, |s| s.stack_pointer = old_sp);

    // 2. Advance the tick count by one time slice.
    let slice = kernel.time_slice_ms_locked(&token);
    let ticks = kernel.sys_ticks.get(&token).wrapping_add(slice);
    kernel.sys_ticks.set(&token, ticks);

    // 3. Wake any task whose sleep has expired.
    sleep_sweep(kernel, &token);

    // 4. Pick the next task, round-robin from `current + 1`.
    let was_running = kernel.threads[current].read(&token).state == ThreadState::Running;
    let next = match select_next(kernel, &token, current) {
        Some(index) => index,
        None if was_running => {
            // Nothing else is runnable; the current task simply keeps going.
            current
        }
        None => {
            // The task that was running gave up the CPU (slept, blocked, or
            // exited) and nothing else is Ready. There is no runnable task
            // left to hand the CPU to; this is a configuration error (every
            // non-bootstrap-only schedule must leave something runnable), so
            // report it loudly and fall back to re-running `current` anyway
            // rather than returning an invalid stack pointer.
            #[cfg(feature = "log")]
            log::error!("context_switch: no runnable task, slot {current} is not Running either");
            current
        }
    };

    // 5. Transition states: the old task yields the CPU unless nothing else
    // took it; the new task becomes Running.
    if next != current && was_running {
        kernel.threads[current].modify(&token, |s| s.state = ThreadState::Ready);
    }
    kernel.threads[next].modify(&token, |s| s.state = ThreadState::Running);
    kernel.current_index.set(&token, next);

    #[cfg(feature = "log")]
    if next != current {
        log::trace!("context_switch: {current} -> {next}");
    }

    // 6. Hand back the new current task's saved stack pointer.
    kernel.threads[next].read(&token).stack_pointer
}

/// Opt-in per-switch stack-overflow sweep (§4.9, §7). `is_corrupted` catches
/// overflow lazily, only when the corrupted task happens to check itself; a
/// trampoline that wants the kernel to notice sooner calls this once per
/// dispatch (typically right alongside [`context_switch`]) instead. Any
/// live, non-bootstrap task whose sentinel byte no longer reads
/// [`STACK_SENTINEL`][crate::tcb::STACK_SENTINEL] is forced `Unused` and
/// reported via `log::error!` — the kernel still never self-aborts; it frees
/// the slot the same way [`retire_current_task`][crate::thread::retire_current_task]
/// does and leaves what to do about it (halt, reboot, recreate the task) to
/// the application.
pub fn check_overflow_on_switch<A: Arch, const N: usize>(kernel: &Kernel<A, N>) {
    let guard = CriticalGuard::<A>::enter();
    let token = guard.token();

    for (index, tcb) in kernel.threads.iter().enumerate() {
        if tcb.read(&token).state == ThreadState::Unused {
            continue;
        }
        if !tcb.sentinel_intact(&token) {
            tcb.modify(&token, |s| {
                s.state = ThreadState::Unused;
                s.stack_base = None;
                s.stack_size = 0;
            });

            #[cfg(feature = "log")]
            log::error!("check_overflow_on_switch: slot {index} stack corrupted, forcing Unused");
            #[cfg(not(feature = "log"))]
            let _ = index;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::critical::CriticalGuard;
    use crate::tcb::TcbState;
    use crate::testutil::TestArch;

    fn make_ready<const N: usize>(kernel: &Kernel<TestArch, N>, index: usize) {
        let guard = CriticalGuard::<TestArch>::enter();
        let token = guard.token();
        kernel.threads[index].write(
            &token,
            TcbState {
                state: ThreadState::Ready,
                ..TcbState::UNUSED
            },
        );
    }

    #[test]
    fn round_robin_picks_next_ready_slot_in_order() {
        let kernel: Kernel<TestArch, 4> = Kernel::new();
        kernel.init(20, 0).unwrap();
        make_ready(&kernel, 2);
        make_ready(&kernel, 3);

        let sp = context_switch(&kernel, 0x100);
        assert_eq!(kernel.current_index(), 2);
        assert_eq!(sp, 0);

        let sp = context_switch(&kernel, 0x200);
        assert_eq!(kernel.current_index(), 3);
        assert_eq!(sp, 0);

        // Slot 0 (the old current) went back to Ready and wraps around next.
        let sp = context_switch(&kernel, 0x300);
        assert_eq!(kernel.current_index(), 0);
        assert_eq!(sp, 0x100);
    }

    #[test]
    fn no_other_ready_task_keeps_current_running() {
        let kernel: Kernel<TestArch, 4> = Kernel::new();
        kernel.init(20, 0).unwrap();

        let sp = context_switch(&kernel, 0xAAAA);
        assert_eq!(kernel.current_index(), 0);
        assert_eq!(sp, 0xAAAA);
    }

    #[test]
    fn sleep_sweep_runs_before_selection_in_the_same_switch() {
        let kernel: Kernel<TestArch, 3> = Kernel::new();
        kernel.init(10, 0).unwrap();

        {
            let guard = CriticalGuard::<TestArch>::enter();
            let token = guard.token();
            kernel.threads[1].write(
                &token,
                TcbState {
                    state: ThreadState::Sleep,
                    wake_time: 10,
                    stack_pointer: 0x900,
                    ..TcbState::UNUSED
                },
            );
        }

        // sys_ticks goes from 0 to 10 in this single switch, so slot 1
        // becomes Ready and eligible in the very same pass (step 3 before 4).
        let sp = context_switch(&kernel, 0x100);
        assert_eq!(kernel.current_index(), 1);
        assert_eq!(sp, 0x900);
    }

    #[test]
    fn tick_count_advances_by_one_time_slice_per_switch() {
        let kernel: Kernel<TestArch, 2> = Kernel::new();
        kernel.init(20, 0).unwrap();

        context_switch(&kernel, 0x1);
        assert_eq!(kernel.get_ticks(), 20);
        context_switch(&kernel, 0x2);
        assert_eq!(kernel.get_ticks(), 40);
    }

    #[test]
    fn overflow_sweep_forces_a_corrupted_task_unused() {
        let kernel: Kernel<TestArch, 3> = Kernel::new();
        kernel.init(20, 0).unwrap();

        let mut stack = [0xAAu8; 8];
        {
            let guard = CriticalGuard::<TestArch>::enter();
            let token = guard.token();
            kernel.threads[1].write(
                &token,
                TcbState {
                    state: ThreadState::Ready,
                    stack_base: Some(stack.as_mut_ptr() as usize),
                    stack_size: stack.len(),
                    ..TcbState::UNUSED
                },
            );
        }

        check_overflow_on_switch(&kernel);
        assert_eq!(kernel.thread_state(1), ThreadState::Ready);

        stack[0] = 0x00; // clobber the sentinel
        check_overflow_on_switch(&kernel);
        assert_eq!(kernel.thread_state(1), ThreadState::Unused);
    }

    #[test]
    fn overflow_sweep_ignores_unused_slots_and_the_bootstrap_task() {
        let kernel: Kernel<TestArch, 2> = Kernel::new();
        kernel.init(20, 0).unwrap();

        check_overflow_on_switch(&kernel);
        assert_eq!(kernel.thread_state(0), ThreadState::Running);
        assert_eq!(kernel.thread_state(1), ThreadState::Unused);
    }
}
