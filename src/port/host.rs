//! Simulation port for hosted targets.
//!
//! The host port models the hardware surface of a port in plain memory:
//! the interrupt mask is a flag, the tick source is driven manually with
//! [`advance_ticks`], and the simulated core is selected with
//! [`set_core_id`]. There is no register state to save, so the deferred
//! context-switch trap reduces to bookkeeping: by the time the trap would
//! fire, the scheduler has already published the new current task.
//!
//! For scenario tests the port keeps a FIFO of *switch actions*. Every
//! requested context switch pops one action and runs it in the place of
//! the task that just became current, which lets a single-threaded test
//! script the interleaving of several tasks deterministically.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering, fence};

use heapless::Deque;

use super::{CoreId, PortTrait};
use crate::scheduler::task::Tcb;
use crate::synch::spinlock::SpinIrqLock;

/// Simulated per-core interrupt enable flag.
static IRQ_ENABLED: AtomicBool = AtomicBool::new(true);

/// Core the calling test is currently simulating.
static SIM_CORE: AtomicU32 = AtomicU32::new(0);

/// Number of context-switch trap requests seen so far.
static SWITCH_REQUESTS: AtomicUsize = AtomicUsize::new(0);

/// Scripted actions, one per requested context switch.
static SWITCH_ACTIONS: SpinIrqLock<Deque<fn(), 32>> = SpinIrqLock::new(Deque::new());

pub struct HostPort;

impl PortTrait for HostPort {
	fn irq_save() -> bool {
		IRQ_ENABLED.swap(false, Ordering::SeqCst)
	}

	fn irq_restore(token: bool) {
		IRQ_ENABLED.store(token, Ordering::SeqCst);
	}

	fn memory_barrier() {
		fence(Ordering::SeqCst);
	}

	fn core_id() -> CoreId {
		SIM_CORE.load(Ordering::SeqCst)
	}

	fn trigger_context_switch() {
		SWITCH_REQUESTS.fetch_add(1, Ordering::SeqCst);

		// The scheduler has already published the incoming task; run the
		// next scripted action in its place, if any.
		let action = SWITCH_ACTIONS.lock().pop_front();
		if let Some(action) = action {
			action();
		}
	}

	#[cfg(feature = "user-mode")]
	fn syscall_context_switch() {
		Self::trigger_context_switch();
	}

	fn init_stack_frame(task: &'static Tcb) {
		// No frame to build; park the saved stack pointer at the stack top.
		task.set_stack_pointer(task.stack_top());
	}

	fn start_scheduling() {
		for core in 0..crate::config::CORE_COUNT {
			set_core_id(core as CoreId);
			crate::scheduler::bootstrap_core(core as CoreId);
		}
		set_core_id(0);
	}

	fn wait_for_interrupt() {
		core::hint::spin_loop();
	}

	fn console_write(msg: &str) {
		std::print!("{msg}");
	}
}

/// Selects the core the caller simulates from now on.
pub fn set_core_id(core: CoreId) {
	SIM_CORE.store(core, Ordering::SeqCst);
}

/// Delivers `n` tick interrupts to the simulated core.
pub fn advance_ticks(n: u32) {
	for _ in 0..n {
		crate::scheduler::tick_handler();
	}
}

/// Queues `action` to run in the place of the task made current by an
/// upcoming context switch.
pub fn push_switch_action(action: fn()) {
	SWITCH_ACTIONS
		.lock()
		.push_back(action)
		.expect("switch action queue full");
}

/// Number of context-switch trap requests issued so far.
pub fn switch_request_count() -> usize {
	SWITCH_REQUESTS.load(Ordering::SeqCst)
}
