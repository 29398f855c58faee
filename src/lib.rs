//! A preemptive, priority-scheduled real-time kernel core for 32-bit
//! microcontrollers.
//!
//! The kernel is a library linked against an application and a platform
//! port. Tasks and their stacks are reserved statically with
//! [`task_define!`]; the scheduler keeps a single ready queue and a single
//! blocked queue that are shared by every core in SMP builds. Lower
//! numerical priority means higher scheduling precedence, and tasks of
//! equal priority are scheduled round robin.
//!
//! The synchronization primitives ([`synch`]) block their callers by
//! parking them on per-primitive wait queues; wakeups hand tokens directly
//! to a specific waiter instead of going through a free count. Software
//! timers ([`timer`]) run their handlers in the context of a dedicated
//! highest-priority service task, never in the tick interrupt.

#![no_std]

#[cfg(not(target_os = "none"))]
extern crate std;

#[macro_use]
extern crate log;

pub mod config;
pub mod errno;
pub mod logging;
pub mod port;
pub mod scheduler;
pub mod synch;
pub mod timer;

pub use crate::errno::KernelError;
pub use crate::scheduler::task;
