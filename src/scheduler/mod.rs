//! The scheduler.
//!
//! One ready queue and one blocked queue are shared by every core; each
//! core keeps its own current and next task. The tick interrupt drives
//! timeouts and preemption: core 0 additionally walks the timer list and
//! the blocked queue before every core picks its next task. All shared
//! scheduler state sits behind a single spin-lock that also masks local
//! interrupts; no lock is ever held across a yield.

use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crate::config::{CORE_COUNT, IDLE_TASK_STACK_WORDS};
use crate::port::{CoreId, Port, PortTrait};
use crate::scheduler::task::{TaskQueue, TaskRef, TaskStatus, Tcb};
use crate::synch::spinlock::{SpinIrqLock, SpinIrqLockGuard};
use crate::{task_define, timer};

pub mod task;

/// Queues shared by all cores, plus the timer subsystem state. Guarded by
/// the scheduler spin-lock.
pub(crate) struct SchedulerState {
	pub ready_queue: TaskQueue,
	pub blocked_queue: TaskQueue,
	pub timers: timer::TimerState,
}

static SCHEDULER: SpinIrqLock<SchedulerState> = SpinIrqLock::new(SchedulerState {
	ready_queue: TaskQueue::new(),
	blocked_queue: TaskQueue::new(),
	timers: timer::TimerState::new(),
});

#[allow(clippy::declare_interior_mutable_const)]
const NO_TASK: AtomicPtr<Tcb> = AtomicPtr::new(ptr::null_mut());

/// Task currently running on each core. Written only under the scheduler
/// lock, read lock-free by `task::current()`.
static CURRENT_TASKS: [AtomicPtr<Tcb>; CORE_COUNT] = [NO_TASK; CORE_COUNT];

/// Task the pending context-switch trap will switch to, per core.
static NEXT_TASKS: [AtomicPtr<Tcb>; CORE_COUNT] = [NO_TASK; CORE_COUNT];

/// Task the pending context-switch trap saves the stack pointer of.
static PREV_TASKS: [AtomicPtr<Tcb>; CORE_COUNT] = [NO_TASK; CORE_COUNT];

static STARTED: AtomicBool = AtomicBool::new(false);

task_define!(
	IDLE_TASK_0,
	idle_entry,
	IDLE_TASK_STACK_WORDS,
	u8::MAX,
	crate::task::CoreAffinity::Core(0)
);
#[cfg(feature = "smp")]
task_define!(
	IDLE_TASK_1,
	idle_entry,
	IDLE_TASK_STACK_WORDS,
	u8::MAX,
	crate::task::CoreAffinity::Core(1)
);

cfg_if::cfg_if! {
	if #[cfg(feature = "smp")] {
		static IDLE_TASKS: [TaskRef; CORE_COUNT] = [&IDLE_TASK_0, &IDLE_TASK_1];
	} else {
		static IDLE_TASKS: [TaskRef; CORE_COUNT] = [&IDLE_TASK_0];
	}
}

extern "C" fn idle_entry(_arg: usize) {
	loop {
		#[cfg(feature = "idle-poll")]
		core::hint::spin_loop();
		#[cfg(not(feature = "idle-poll"))]
		Port::wait_for_interrupt();
	}
}

pub(crate) fn state() -> SpinIrqLockGuard<'static, SchedulerState> {
	SCHEDULER.lock()
}

fn load_task(slot: &AtomicPtr<Tcb>) -> Option<TaskRef> {
	let task = slot.load(Ordering::SeqCst);
	// Non-null values only ever come from `&'static Tcb`.
	unsafe { task.as_ref() }
}

fn store_task(slot: &AtomicPtr<Tcb>, task: Option<TaskRef>) {
	let raw = match task {
		Some(task) => ptr::from_ref(task).cast_mut(),
		None => ptr::null_mut(),
	};
	slot.store(raw, Ordering::SeqCst);
}

pub(crate) fn current_on(core: CoreId) -> Option<TaskRef> {
	load_task(&CURRENT_TASKS[core as usize])
}

/// Is the scheduler dispatching tasks yet?
pub fn is_started() -> bool {
	STARTED.load(Ordering::SeqCst)
}

/// Would waking `wakee` preempt the caller at the next scheduling point?
pub(crate) fn should_preempt(wakee: TaskRef) -> bool {
	match task::current() {
		Some(current) => wakee.priority() <= current.priority(),
		None => false,
	}
}

/// Picks the next task for the calling core. Returns whether a context
/// switch is required. Caller holds the scheduler lock.
fn select_next(state: &mut SchedulerState) -> bool {
	let core = Port::core_id();
	let current = current_on(core);

	let Some(next_ready) = state.ready_queue.peek_for_core(core) else {
		return false;
	};

	if let Some(current) = current {
		if current.status() == TaskStatus::Running {
			if next_ready.priority() <= current.priority() {
				// Preempted: back into the ready queue behind its equals,
				// which is what round-robins a priority band.
				current.set_status(TaskStatus::Ready);
				state.ready_queue.add(current);
			} else {
				return false;
			}
		}
	}

	let next = state.ready_queue.get_for_core(core).unwrap();
	next.set_status(TaskStatus::Running);

	store_task(&PREV_TASKS[core as usize], current);
	store_task(&CURRENT_TASKS[core as usize], Some(next));
	store_task(&NEXT_TASKS[core as usize], Some(next));

	trace!("core {} switches to task {}", core, next.name());
	true
}

fn request_context_switch() {
	#[cfg(feature = "user-mode")]
	Port::syscall_context_switch();
	#[cfg(not(feature = "user-mode"))]
	Port::trigger_context_switch();
}

/// Voluntarily gives up the CPU. The context switch itself is deferred to
/// the port's trap; by the time the caller runs again, scheduling state
/// has advanced.
pub fn yield_now() {
	if !is_started() {
		return;
	}

	let switch = {
		let mut state = SCHEDULER.lock();
		select_next(&mut state)
	};

	if switch {
		request_context_switch();
	}
}

/// Decrements the sleep budget of every blocked task with a deadline and
/// readies the expired ones.
fn sweep_timeouts(state: &mut SchedulerState) {
	let mut expired: heapless::Vec<TaskRef, { crate::config::MAX_TASKS }> = heapless::Vec::new();

	for blocked in state.blocked_queue.iter() {
		let ticks = blocked.remaining_sleep_ticks();
		if ticks > 0 {
			blocked.set_sleep_ticks(ticks - 1);
			if ticks == 1 {
				let _ = expired.push(blocked);
			}
		}
	}

	for woken in expired {
		let reason = if woken.blocked_reason() == task::BlockedReason::Sleep {
			task::WakeupReason::SleepTimeout
		} else {
			task::WakeupReason::WaitTimeout
		};
		task::set_ready_locked(state, woken, reason);
	}
}

/// Tick interrupt entry, called by the port on every core. Core 0 advances
/// the software timers and the blocked-queue timeouts before the common
/// next-task selection.
pub fn tick_handler() {
	if !is_started() {
		return;
	}

	let switch = {
		let mut state = SCHEDULER.lock();

		if Port::core_id() == 0 {
			timer::process_timers(&mut state);
			if !state.blocked_queue.is_empty() {
				sweep_timeouts(&mut state);
			}
		}

		select_next(&mut state)
	};

	if switch {
		Port::trigger_context_switch();
	}
}

/// Context-switch trap entry, called by the port with the outgoing task's
/// stack pointer. Saves it, traps on a stack overflow, and returns the
/// incoming task's stack pointer.
pub fn switch_context(stack_pointer: usize) -> usize {
	let core = Port::core_id() as usize;
	let _state = SCHEDULER.lock();

	if let Some(outgoing) = load_task(&PREV_TASKS[core]) {
		outgoing.set_stack_pointer(stack_pointer);
		check_stack_overflow(outgoing, stack_pointer);
	}

	load_task(&NEXT_TASKS[core]).map_or(stack_pointer, |incoming| incoming.stack_pointer())
}

fn check_stack_overflow(task: TaskRef, stack_pointer: usize) {
	let guard_limit = task.stack().guard_limit();
	if stack_pointer <= guard_limit {
		error!(
			"task {} overflowed its stack: sp {:#x}, guard ends at {:#x}",
			task.name(),
			stack_pointer,
			guard_limit
		);
		panic!("stack overflow in task {}", task.name());
	}
}

/// Dispatches the first task on a core that is joining the scheduler.
/// Called by the port once per core during start-up.
pub(crate) fn bootstrap_core(core: CoreId) {
	let mut state = SCHEDULER.lock();

	let first = state
		.ready_queue
		.get_for_core(core)
		.expect("no runnable task for core");
	first.set_status(TaskStatus::Running);

	store_task(&CURRENT_TASKS[core as usize], Some(first));
	store_task(&NEXT_TASKS[core as usize], Some(first));

	debug!("core {} boots with task {}", core, first.name());
}

/// Starts the scheduler: registers the timer service task and the per-core
/// idle tasks, then hands over to the port to dispatch the first task on
/// every core.
pub fn start() {
	if STARTED.load(Ordering::SeqCst) {
		return;
	}

	timer::start_service_task();
	for idle in IDLE_TASKS {
		task::start(idle);
	}

	info!("scheduler starting on {} core(s)", CORE_COUNT);
	STARTED.store(true, Ordering::SeqCst);

	Port::start_scheduling();
}
