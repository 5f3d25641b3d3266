//! Thread control block.
use crate::critical::Shared;

/// Sentinel byte written to `stack_base[0]` of every managed task. Finding
/// anything else there means the task has overrun its stack.
pub const STACK_SENTINEL: u8 = 0xAA;

/// A task's position in the scheduling state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// The slot holds no task.
    Unused,
    /// `threads[current_index]`'s state; exactly one slot has it at a time.
    Running,
    /// Eligible for selection on the next context-switch pass.
    Ready,
    /// Blocked until `sys_ticks >= wake_time`.
    Sleep,
    /// Blocked in some mutex's wait set.
    Blocked,
}

/// The mutable half of a [`Tcb`][self], grouped into one `Copy` struct so a
/// whole task's bookkeeping can be read or replaced in a single
/// [`Shared`] access instead of one per field.
#[derive(Debug, Clone, Copy)]
pub struct TcbState {
    /// Saved top-of-stack address for this task when it is not running.
    /// Meaningless while `state == Running` (the live value lives in the
    /// CPU's actual stack-pointer register) or `state == Unused`.
    pub stack_pointer: usize,
    /// Lowest address of the task's stack buffer, or `None` for the
    /// bootstrap task, which runs on the system's original stack and has no
    /// kernel-managed bounds to check.
    pub stack_base: Option<usize>,
    /// Bytes in the buffer at `stack_base`. Unused when `stack_base` is
    /// `None`.
    pub stack_size: usize,
    /// Absolute tick at which a `Sleep` task becomes `Ready`.
    pub wake_time: u32,
    pub state: ThreadState,
}

impl TcbState {
    /// The state of an empty, never-initialized slot.
    pub const UNUSED: Self = Self {
        stack_pointer: 0,
        stack_base: None,
        stack_size: 0,
        wake_time: 0,
        state: ThreadState::Unused,
    };

    /// The state of the bootstrap task (slot 0) immediately after `init`.
    pub const BOOTSTRAP: Self = Self {
        stack_pointer: 0,
        stack_base: None,
        stack_size: 0,
        wake_time: 0,
        state: ThreadState::Running,
    };
}

/// One thread control block. Interior mutability is provided by [`Shared`]:
/// every read or write requires a [`CriticalToken`][crate::critical::CriticalToken],
/// which can only be obtained while interrupts are disabled.
pub struct Tcb(Shared<TcbState>);

impl Tcb {
    pub const fn new() -> Self {
        Self(Shared::new(TcbState::UNUSED))
    }

    #[inline]
    pub fn read(&self, token: &crate::critical::CriticalToken<'_>) -> TcbState {
        self.0.get(token)
    }

    #[inline]
    pub fn write(&self, token: &crate::critical::CriticalToken<'_>, state: TcbState) {
        self.0.set(token, state)
    }

    #[inline]
    pub fn modify<R>(
        &self,
        token: &crate::critical::CriticalToken<'_>,
        f: impl FnOnce(&mut TcbState) -> R,
    ) -> R {
        self.0.with_mut(token, f)
    }

    /// Does `stack_base[0]` still hold [`STACK_SENTINEL`]?
    ///
    /// Returns `true` (not corrupted) for the bootstrap task, which has no
    /// kernel-managed stack to check, matching §4.4's "for the bootstrap
    /// task... returns false [for is_corrupted]".
    pub fn sentinel_intact(&self, token: &crate::critical::CriticalToken<'_>) -> bool {
        let st = self.read(token);
        match st.stack_base {
            None => true,
            Some(base) => {
                // Safety: `base` was derived from a live `&'static mut [u8]`
                // handed to `new_thread` and the kernel never frees it.
                let byte = unsafe { core::ptr::read_volatile(base as *const u8) };
                byte == STACK_SENTINEL
            }
        }
    }
}

impl Default for Tcb {
    fn default() -> Self {
        Self::new()
    }
}
