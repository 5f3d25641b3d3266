//! The host turnstile: one real OS thread per simulated task, parked except
//! for whichever one the kernel has scheduled, exactly as `ums.rs`'s
//! `ThreadGroup` runs a client scheduler's threads — just with
//! `corelet_kernel::sched::context_switch` standing in for the client
//! `Scheduler` trait.
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread::Thread;

use corelet_kernel::kernel::TaskFn;
use corelet_kernel::tcb::ThreadState;
use corelet_kernel::{Kernel, ThreadHandle};

use crate::arch::HostArch;

/// Placeholder entry point for tasks whose real body is a Rust closure
/// passed to [`Runtime::spawn`]. `corelet_kernel` still writes a synthetic
/// stack frame pointing at this address for bookkeeping parity with a real
/// target, but this port never dispatches into it directly — the spawned
/// OS thread runs `body` instead.
pub extern "C" fn placeholder_entry() {}

/// Panic payload used to unwind a retired task's worker thread out of
/// [`corelet_kernel::thread::retire_current_task`]'s `-> !` loop without
/// treating it as a real panic. Caught in [`Runtime::spawn`]'s wrapper.
struct TaskRetired;

trait ErasedRuntime: Send + Sync {
    fn dispatch(&self);
}

thread_local! {
    static CURRENT_RUNTIME: RefCell<Option<&'static dyn ErasedRuntime>> = const { RefCell::new(None) };
    static CURRENT_SLOT: Cell<usize> = const { Cell::new(0) };
}

/// Entry point [`HostArch::request_yield`](corelet_kernel::Arch::request_yield)
/// calls on whichever OS thread is presently simulating the running task.
pub(crate) fn dispatch() {
    CURRENT_RUNTIME.with(|cell| {
        let runtime = cell
            .borrow()
            .expect("calling thread is not managed by a corelet_port_std::Runtime");
        runtime.dispatch();
    });
}

/// Binds the `MAX_THREADS` kernel task table to `MAX_THREADS` real OS
/// threads. [`Runtime::new`] claims the calling thread as slot 0 (the
/// bootstrap task, per `corelet_kernel`'s convention); [`Runtime::spawn`]
/// adds one worker thread per subsequent task.
pub struct Runtime<const N: usize> {
    kernel: &'static Kernel<HostArch, N>,
    threads: Mutex<[Option<Thread>; N]>,
}

impl<const N: usize> Runtime<N> {
    /// Claim the calling thread as the bootstrap task and bind it to
    /// `kernel`, which must already have had [`Kernel::init`] called on it.
    /// Leaked deliberately: a `Runtime` lives for the rest of the process,
    /// same as the kernel singleton it drives.
    pub fn new(kernel: &'static Kernel<HostArch, N>) -> &'static Runtime<N> {
        let runtime: &'static Runtime<N> = Box::leak(Box::new(Runtime {
            kernel,
            threads: Mutex::new(core::array::from_fn(|_| None)),
        }));

        runtime.threads.lock().unwrap()[0] = Some(std::thread::current());
        runtime.bind_current_thread(0);
        runtime
    }

    fn bind_current_thread(&'static self, slot: usize) {
        CURRENT_RUNTIME.with(|cell| *cell.borrow_mut() = Some(self as &'static dyn ErasedRuntime));
        CURRENT_SLOT.with(|cell| cell.set(slot));
    }

    /// Allocate a task slot via [`Kernel::new_thread`] and run `body` on a
    /// freshly spawned, initially-parked OS thread standing in for it.
    /// `stack` is still passed through to the kernel so its table-scan,
    /// sentinel, and frame-construction logic exercise real memory, even
    /// though this port never dispatches into the fabricated frame.
    pub fn spawn(
        &'static self,
        stack: &'static mut [u8],
        body: impl FnOnce() + Send + 'static,
    ) -> ThreadHandle {
        let handle = self
            .kernel
            .new_thread(placeholder_entry as TaskFn, stack)
            .expect("no free task slot");
        let index = handle.index();
        let kernel = self.kernel;

        let join = std::thread::Builder::new()
            .name(format!("corelet-task-{index}"))
            .spawn(move || {
                self.bind_current_thread(index);
                std::thread::park();

                let result: std::thread::Result<()> = catch_unwind(AssertUnwindSafe(|| {
                    body();
                    corelet_kernel::thread::retire_current_task(kernel)
                }));

                if let Err(payload) = result {
                    if !is_task_retired(&payload) {
                        log::error!("task in slot {index} panicked: {payload:?}");
                    }
                }
            })
            .expect("failed to spawn worker thread for task slot");

        // Stored by the parent, synchronously, so a scheduler decision that
        // selects this slot before the child thread has even started still
        // finds a handle to unpark (see `ums.rs`'s identical reasoning for
        // storing `join_handle` right after `spawn` rather than letting the
        // child register itself).
        self.threads.lock().unwrap()[index] = Some(join.thread().clone());

        handle
    }

    /// Drive the scheduler from the bootstrap thread until it, too, is
    /// selected away and parked; resumes when scheduled again. Intended to
    /// be called in a loop by the bootstrap task's own body, the same way a
    /// real target's `main` would call [`yield_now`](corelet_kernel::thread::yield_now).
    pub fn run_bootstrap_tick(&'static self) {
        corelet_kernel::thread::yield_now(self.kernel);
    }
}

fn is_task_retired(payload: &Box<dyn Any + Send>) -> bool {
    payload.downcast_ref::<TaskRetired>().is_some()
}

impl<const N: usize> ErasedRuntime for Runtime<N> {
    fn dispatch(&self) {
        let my_slot = CURRENT_SLOT.with(|cell| cell.get());
        let _ = corelet_kernel::context_switch(self.kernel, 0);
        let target = self.kernel.current_index();

        if target != my_slot {
            let next_thread = self.threads.lock().unwrap()[target].clone();
            if let Some(thread) = next_thread {
                thread.unpark();
            }
        }

        if self.kernel.thread_state(my_slot) == ThreadState::Unused {
            std::panic::panic_any(TaskRetired);
        }

        if target != my_slot {
            std::thread::park();
        }
    }
}
