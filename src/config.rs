//! Compile-time kernel configuration.

/// Number of cores sharing the scheduler state.
pub const CORE_COUNT: usize = if cfg!(feature = "smp") { 2 } else { 1 };

/// Interval between two tick interrupts in microseconds.
pub const TICK_INTERVAL_US: u32 = 1000;

/// Upper bound on the number of tasks a single queue can hold. Sizes the
/// node arena of every task queue.
pub const MAX_TASKS: usize = 32;

/// Upper bound on the number of concurrently running software timers.
pub const MAX_TIMERS: usize = 16;

/// Depth of the timeout-handler dispatch queue drained by the timer task.
pub const TIMER_DISPATCH_DEPTH: usize = 16;

/// Words below the stack limit that count as the guard zone of a task
/// stack. A saved stack pointer inside the guard zone is a fatal error.
pub const STACK_GUARD_WORDS: usize = 8;

/// Stack reservation of the timer service task, in words.
pub const TIMER_TASK_STACK_WORDS: usize = 512;

/// Stack reservation of the per-core idle tasks, in words.
pub const IDLE_TASK_STACK_WORDS: usize = 128;
