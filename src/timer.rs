//! Software timers.
//!
//! Running timers sit on an unordered list that the core-0 tick handler
//! walks under the scheduler lock. An expired timer never runs its handler
//! in the tick interrupt: the handler is pushed onto a dispatch FIFO that a
//! dedicated highest-priority service task drains in task context, so
//! handlers may freely block on the synchronization primitives without
//! stretching interrupt latency. Only the O(n) list walk remains on the
//! tick path.

use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use heapless::{Deque, Vec};

use crate::config::{MAX_TIMERS, TIMER_DISPATCH_DEPTH, TIMER_TASK_STACK_WORDS};
use crate::errno::{KernelError, Result};
use crate::scheduler::task::{self, BlockedReason, TaskRef, TaskStatus, WakeupReason};
use crate::scheduler::{self, SchedulerState};
use crate::task_define;

/// A timeout handler. Runs in the timer task's context.
pub type TimeoutHandler = fn();

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerMode {
	/// Stops itself after the first expiry.
	SingleShot,
	/// Rearms itself with its interval on every expiry.
	Periodic,
}

/// A statically allocated software timer.
///
/// A node is on the timer list exactly while it is running.
pub struct TimerNode {
	handler: TimeoutHandler,
	mode: TimerMode,
	interval_ticks: AtomicU32,
	ticks_to_expire: AtomicU32,
	running: AtomicBool,
}

impl TimerNode {
	pub const fn new(handler: TimeoutHandler, mode: TimerMode) -> Self {
		Self {
			handler,
			mode,
			interval_ticks: AtomicU32::new(0),
			ticks_to_expire: AtomicU32::new(0),
			running: AtomicBool::new(false),
		}
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::SeqCst)
	}

	/// Arms the timer to expire `interval_ticks` ticks from now.
	pub fn start(&'static self, interval_ticks: u32) -> Result {
		if interval_ticks == 0 {
			return Err(KernelError::InvalidArgument);
		}

		let mut state = scheduler::state();

		if self.is_running() {
			return Err(KernelError::AlreadyActive);
		}

		self.interval_ticks.store(interval_ticks, Ordering::SeqCst);
		self.ticks_to_expire.store(interval_ticks, Ordering::SeqCst);
		state
			.timers
			.list
			.push(self)
			.map_err(|_| KernelError::NoMemory)?;
		self.running.store(true, Ordering::SeqCst);

		Ok(())
	}

	/// Disarms the timer, preventing its next expiry and all subsequent
	/// ones.
	pub fn stop(&'static self) -> Result {
		let mut state = scheduler::state();
		self.stop_locked(&mut state.timers)
	}

	fn stop_locked(&'static self, timers: &mut TimerState) -> Result {
		if !self.running.swap(false, Ordering::SeqCst) {
			return Err(KernelError::NotActive);
		}

		let Some(position) = timers.list.iter().position(|node| ptr::eq(*node, self)) else {
			return Err(KernelError::Empty);
		};
		timers.list.swap_remove(position);

		Ok(())
	}
}

/// Timer list and dispatch queue; lives inside the scheduler state so both
/// are guarded by the scheduler lock.
pub(crate) struct TimerState {
	list: Vec<&'static TimerNode, MAX_TIMERS>,
	dispatch: Deque<TimeoutHandler, TIMER_DISPATCH_DEPTH>,
}

impl TimerState {
	pub const fn new() -> Self {
		Self {
			list: Vec::new(),
			dispatch: Deque::new(),
		}
	}
}

task_define!(TIMER_TASK, timer_task_entry, TIMER_TASK_STACK_WORDS, 0);

/// Handle of the timer service task.
pub fn service_task() -> TaskRef {
	&TIMER_TASK
}

pub(crate) fn start_service_task() {
	task::start(&TIMER_TASK);
}

extern "C" fn timer_task_entry(_arg: usize) {
	loop {
		if run_pending() == 0 {
			wait_for_timeouts();
		}
	}
}

/// Executes every queued timeout handler in the caller's context and
/// returns how many ran. Normally invoked by the timer service task.
pub fn run_pending() -> usize {
	let mut handled = 0;

	loop {
		let handler = scheduler::state().timers.dispatch.pop_front();
		match handler {
			Some(handler) => {
				handler();
				handled += 1;
			}
			None => break,
		}
	}

	handled
}

/// Blocks the calling task until a timer expires. The loop of the timer
/// service task parks here whenever the dispatch queue runs dry.
pub fn wait_for_timeouts() {
	task::block_current(BlockedReason::WaitTimer, None);
}

/// Tick-path walk over the running timers: advances every expiry counter,
/// queues the handlers of expired timers and wakes the service task.
/// Caller holds the scheduler lock.
pub(crate) fn process_timers(state: &mut SchedulerState) {
	let mut expired: Vec<&'static TimerNode, MAX_TIMERS> = Vec::new();

	for node in state.timers.list.iter() {
		let ticks = node.ticks_to_expire.load(Ordering::SeqCst);
		if ticks > 0 {
			node.ticks_to_expire.store(ticks - 1, Ordering::SeqCst);
			if ticks == 1 {
				let _ = expired.push(*node);
			}
		}
	}

	for node in expired {
		if state.timers.dispatch.push_back(node.handler).is_err() {
			warn!("timer dispatch queue is full, dropping a timeout handler");
		}

		if TIMER_TASK.status() == TaskStatus::Blocked {
			task::set_ready_locked(state, &TIMER_TASK, WakeupReason::TimerTimeout);
		}

		node.ticks_to_expire
			.store(node.interval_ticks.load(Ordering::SeqCst), Ordering::SeqCst);

		if node.mode == TimerMode::SingleShot {
			let _ = node.stop_locked(&mut state.timers);
		}
	}
}
