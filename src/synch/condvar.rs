//! Condition variable layered over a mutex.

use heapless::Vec;

use crate::config::MAX_TASKS;
use crate::errno::{KernelError, Result};
use crate::scheduler::{self, task};
use crate::synch::mutex::Mutex;
use crate::synch::spinlock::SpinIrqLock;
use crate::task::{BlockedReason, TaskQueue, TaskRef, WakeupReason};

struct CondVarState {
	wait_queue: TaskQueue,
}

/// A condition variable.
///
/// Waiting releases the associated mutex and reacquires it before
/// returning, on the success and the timeout path alike. A waiter that is
/// woken for any other reason (suspended and resumed, say) goes straight
/// back to waiting: only a signal or a timeout ends the wait, and callers
/// must still recheck their predicate either way.
pub struct CondVar {
	mutex: &'static Mutex,
	state: SpinIrqLock<CondVarState>,
}

impl CondVar {
	/// Creates a condition variable over `mutex`, which the condvar borrows
	/// for its lifetime.
	pub const fn new(mutex: &'static Mutex) -> Self {
		Self {
			mutex,
			state: SpinIrqLock::new(CondVarState {
				wait_queue: TaskQueue::new(),
			}),
		}
	}

	pub fn mutex(&self) -> &'static Mutex {
		self.mutex
	}

	/// Atomically releases the mutex and waits for a signal, up to
	/// `wait_ticks` ticks (`None` waits forever). The mutex must be held by
	/// the calling task and is held again when this returns.
	pub fn wait(&self, wait_ticks: Option<u32>) -> Result {
		let Some(current) = task::current() else {
			return Err(KernelError::InvalidArgument);
		};

		let mut state = self.state.lock();
		self.mutex.unlock_for_wait()?;

		let result = loop {
			if !state.wait_queue.contains(current) {
				state.wait_queue.add(current);
			}
			drop(state);

			task::block_current(BlockedReason::WaitCondVar, wait_ticks);

			state = self.state.lock();
			match current.wakeup_reason() {
				WakeupReason::CondVarSignalled => break Ok(()),
				WakeupReason::WaitTimeout => {
					state.wait_queue.remove(current);
					break Err(KernelError::Timeout);
				}
				// Suspended while waiting and later resumed; nobody
				// signalled, so wait again.
				_ => {}
			}
		};
		drop(state);

		// Both paths return with the mutex held again.
		self.mutex.lock(None)?;
		result
	}

	/// Wakes the highest-priority waiter.
	pub fn signal(&self) -> Result {
		let wakee = self.state.lock().wait_queue.pop_unsuspended();

		let Some(wakee) = wakee else {
			return Err(KernelError::NoTask);
		};

		task::set_ready(wakee, WakeupReason::CondVarSignalled);
		if scheduler::should_preempt(wakee) {
			scheduler::yield_now();
		}

		Ok(())
	}

	/// Wakes every waiter. No yield happens here; the ordinary scheduling
	/// rules pick the highest-priority one at the next scheduling point.
	pub fn broadcast(&self) -> Result {
		let woken = {
			let mut state = self.state.lock();

			if state.wait_queue.is_empty() {
				return Err(KernelError::NoTask);
			}

			let mut woken: Vec<TaskRef, MAX_TASKS> = Vec::new();
			while let Some(wakee) = state.wait_queue.pop_unsuspended() {
				let _ = woken.push(wakee);
			}
			woken
		};

		for wakee in woken {
			task::set_ready(wakee, WakeupReason::CondVarSignalled);
		}

		Ok(())
	}
}
