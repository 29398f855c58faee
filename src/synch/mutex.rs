//! Mutex with ownership and optional priority inheritance.

use core::ptr;

use crate::errno::{KernelError, Result};
use crate::port::{Port, PortTrait};
use crate::scheduler::{self, task};
use crate::synch::spinlock::SpinIrqLock;
#[cfg(feature = "priority-inheritance")]
use crate::task::Priority;
use crate::task::{BlockedReason, TaskQueue, TaskRef, WakeupReason};

struct MutexState {
	locked: bool,
	owner: Option<TaskRef>,
	/// The owner's saved priority; `Some` exactly while inheritance is
	/// active.
	owner_default_priority: Option<u8>,
	wait_queue: TaskQueue,
}

/// An owned, non-recursive lock.
///
/// Only the owner may unlock. Unlocking with waiters present hands
/// ownership directly to the highest-priority eligible waiter; the mutex
/// never becomes free in between, which prevents both a thundering herd
/// and priority inversion through late arrivals.
///
/// Because of the ownership concept and because priority inheritance
/// mutates another task's priority, mutexes must not be used from
/// interrupt handlers.
pub struct Mutex {
	state: SpinIrqLock<MutexState>,
}

impl Mutex {
	#[allow(clippy::new_without_default)]
	pub const fn new() -> Self {
		Self {
			state: SpinIrqLock::new(MutexState {
				locked: false,
				owner: None,
				owner_default_priority: None,
				wait_queue: TaskQueue::new(),
			}),
		}
	}

	/// The task currently owning the mutex.
	pub fn owner(&self) -> Option<TaskRef> {
		self.state.lock().owner
	}

	pub fn is_locked(&self) -> bool {
		self.state.lock().locked
	}

	/// Acquires the mutex, waiting up to `wait_ticks` ticks (`Some(0)`
	/// never waits, `None` waits forever).
	pub fn lock(&self, wait_ticks: Option<u32>) -> Result {
		let Some(current) = task::current() else {
			return Err(KernelError::InvalidArgument);
		};

		let mut state = self.state.lock();
		loop {
			#[cfg(feature = "priority-inheritance")]
			if let Some(owner) = state.owner {
				if current.priority() < owner.priority() {
					if state.owner_default_priority.is_none() {
						state.owner_default_priority = Some(owner.priority().into());
					}
					apply_inheritance(owner, current.priority());
				}
			}

			if !state.locked {
				state.locked = true;
				state.owner = Some(current);
				return Ok(());
			}

			if wait_ticks == Some(0) {
				return Err(KernelError::Busy);
			}

			if !state.wait_queue.contains(current) {
				state.wait_queue.add(current);
			}
			drop(state);

			task::block_current(BlockedReason::WaitMutex, wait_ticks);

			state = self.state.lock();
			match current.wakeup_reason() {
				WakeupReason::MutexLocked => {
					if let Some(owner) = state.owner {
						if ptr::eq(owner, current) {
							// Ownership was handed over by the unlocker.
							return Ok(());
						}
					}
				}
				WakeupReason::WaitTimeout => {
					state.wait_queue.remove(current);
					return Err(KernelError::Timeout);
				}
				// Suspended while waiting and later resumed: try again.
				_ => {}
			}
		}
	}

	/// Releases the mutex. Legal only from the owner.
	pub fn unlock(&self) -> Result {
		self.unlock_inner(true)
	}

	/// Release path of a condition-variable wait: identical to
	/// [`unlock`](Self::unlock) but defers any preemption to the wait's own
	/// yield, since the caller blocks immediately afterwards.
	pub(crate) fn unlock_for_wait(&self) -> Result {
		self.unlock_inner(false)
	}

	fn unlock_inner(&self, allow_yield: bool) -> Result {
		let Some(current) = task::current() else {
			return Err(KernelError::NotOwner);
		};

		let wakee = {
			let mut state = self.state.lock();

			match state.owner {
				Some(owner) if ptr::eq(owner, current) => {}
				_ => return Err(KernelError::NotOwner),
			}
			if !state.locked {
				return Err(KernelError::NotLocked);
			}

			#[cfg(feature = "priority-inheritance")]
			if let Some(default_priority) = state.owner_default_priority.take() {
				revert_inheritance(current, default_priority);
			}

			match state.wait_queue.get_unsuspended_for_core(Port::core_id()) {
				Some(next_owner) => {
					// Hand ownership straight to the next owner; the mutex
					// stays locked throughout.
					state.owner = Some(next_owner);
					task::set_ready(next_owner, WakeupReason::MutexLocked);
					Some(next_owner)
				}
				None => {
					state.locked = false;
					state.owner = None;
					None
				}
			}
		};

		if allow_yield {
			if let Some(next_owner) = wakee {
				if scheduler::should_preempt(next_owner) {
					scheduler::yield_now();
				}
			}
		}

		Ok(())
	}
}

/// Boosts the owner to the waiter's priority, repositioning it in the
/// ready queue if queued.
#[cfg(feature = "priority-inheritance")]
fn apply_inheritance(owner: TaskRef, boost: Priority) {
	trace!("boosting task {} to priority {}", owner.name(), boost);
	task::set_priority(owner, boost);
}

/// Restores the priority the owner had before inheritance.
#[cfg(feature = "priority-inheritance")]
fn revert_inheritance(owner: TaskRef, default_priority: u8) {
	trace!(
		"restoring task {} to priority {}",
		owner.name(),
		default_priority
	);
	task::set_priority(owner, Priority::from(default_priority));
}
