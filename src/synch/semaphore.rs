//! Counting semaphore.

use crate::errno::{KernelError, Result};
use crate::port::{Port, PortTrait};
use crate::scheduler::{self, task};
use crate::synch::spinlock::SpinIrqLock;
use crate::task::{BlockedReason, TaskQueue, WakeupReason};

struct SemaphoreState {
	count: u8,
	max_count: u8,
	wait_queue: TaskQueue,
}

/// A counting, blocking semaphore.
///
/// When a token is given while tasks are waiting, it is handed directly to
/// the highest-priority eligible waiter instead of incrementing the count.
/// This closes the race in which a lower-priority task could slip in
/// between an increment and a take.
pub struct Semaphore {
	state: SpinIrqLock<SemaphoreState>,
}

impl Semaphore {
	/// Creates a semaphore holding `initial_count` of at most `max_count`
	/// tokens.
	pub const fn new(initial_count: u8, max_count: u8) -> Self {
		assert!(initial_count <= max_count);
		Self {
			state: SpinIrqLock::new(SemaphoreState {
				count: initial_count,
				max_count,
				wait_queue: TaskQueue::new(),
			}),
		}
	}

	/// Number of free tokens. Zero while takers are being served by direct
	/// hand-off.
	pub fn count(&self) -> u8 {
		self.state.lock().count
	}

	/// Takes a token, waiting up to `wait_ticks` ticks for one (`Some(0)`
	/// never waits, `None` waits forever).
	pub fn take(&self, wait_ticks: Option<u32>) -> Result {
		let Some(current) = task::current() else {
			// No task context to block; degenerate to the bounded attempt.
			return self.try_take();
		};

		let mut state = self.state.lock();
		loop {
			if state.count > 0 {
				state.count -= 1;
				return Ok(());
			}

			if wait_ticks == Some(0) {
				return Err(KernelError::Busy);
			}

			if !state.wait_queue.contains(current) {
				state.wait_queue.add(current);
			}
			drop(state);

			task::block_current(BlockedReason::WaitSemaphore, wait_ticks);

			state = self.state.lock();
			match current.wakeup_reason() {
				// The giver handed the token over directly.
				WakeupReason::SemaphoreTaken => return Ok(()),
				WakeupReason::WaitTimeout => {
					state.wait_queue.remove(current);
					return Err(KernelError::Timeout);
				}
				// Suspended while waiting and later resumed: try again.
				_ => {}
			}
		}
	}

	/// Non-blocking take; the variant to use from interrupt handlers.
	pub fn try_take(&self) -> Result {
		let mut state = self.state.lock();
		if state.count > 0 {
			state.count -= 1;
			Ok(())
		} else {
			Err(KernelError::Busy)
		}
	}

	/// Returns a token, waking the highest-priority eligible waiter if
	/// there is one. Safe to call from interrupt handlers.
	pub fn give(&self) -> Result {
		let wakee = {
			let mut state = self.state.lock();

			if state.count == state.max_count {
				return Err(KernelError::NoSem);
			}

			match state.wait_queue.get_unsuspended_for_core(Port::core_id()) {
				Some(wakee) => {
					// Direct hand-off: the count stays untouched.
					task::set_ready(wakee, WakeupReason::SemaphoreTaken);
					Some(wakee)
				}
				None => {
					state.count += 1;
					None
				}
			}
		};

		if let Some(wakee) = wakee {
			if scheduler::should_preempt(wakee) {
				scheduler::yield_now();
			}
		}

		Ok(())
	}
}
