//! Platform interface consumed by the kernel core.
//!
//! The core is hardware-agnostic: everything it needs from the CPU is the
//! capability set of [`PortTrait`]. A port supplies critical sections,
//! per-core identity, the deferred context-switch trap, initial stack
//! frames and the tick source; the kernel supplies everything else.
//!
//! Hardware ports (stack frame layout, trap entry, interrupt controller
//! programming) live out of tree next to the board support code and are
//! selected here when building for a target. Hosted builds use the
//! [`host`] simulation port, which also backs the test suite.

use crate::scheduler::task::Tcb;

/// Unique identifier for a core.
pub type CoreId = u32;

/// Capability set the kernel consumes from the platform.
///
/// Implementations must not call back into the scheduler; the kernel
/// invokes these hooks with its own locking already in place.
pub trait PortTrait {
	/// Disables interrupts on the calling core and returns the previous
	/// interrupt state as a token for [`irq_restore`](PortTrait::irq_restore).
	fn irq_save() -> bool;

	/// Restores the interrupt state captured by a matching
	/// [`irq_save`](PortTrait::irq_save).
	fn irq_restore(token: bool);

	/// Full memory barrier.
	fn memory_barrier();

	/// Identifier of the calling core.
	fn core_id() -> CoreId;

	/// Requests the deferred context-switch trap. The trap is serviced once
	/// all higher-priority interrupts have retired and calls
	/// [`scheduler::switch_context`](crate::scheduler::switch_context).
	fn trigger_context_switch();

	/// Requests the context-switch trap through the system-call gate.
	/// Unprivileged tasks cannot raise the trap directly.
	#[cfg(feature = "user-mode")]
	fn syscall_context_switch();

	/// Builds the initial stack frame of `task` so that the first dispatch
	/// enters the task at its entry function with its parameter in place,
	/// as if it had just been preempted there.
	fn init_stack_frame(task: &'static Tcb);

	/// Hands control to the port after [`scheduler::start`](crate::scheduler::start)
	/// has populated the ready queue. On hardware this dispatches the first
	/// task on every core and never returns; the simulation port bootstraps
	/// the simulated cores and returns to the caller.
	fn start_scheduling();

	/// Low-power wait used by the idle tasks.
	fn wait_for_interrupt();

	/// Sink for kernel log output.
	fn console_write(msg: &str);
}

cfg_if::cfg_if! {
	if #[cfg(target_os = "none")] {
		compile_error!("no in-tree port for bare-metal targets; select your platform port here");
	} else {
		pub mod host;
		pub(crate) use self::host::HostPort as Port;
	}
}
