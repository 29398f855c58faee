//! Task control blocks, the task state machine and the priority-ordered
//! task queue.
//!
//! Tasks and their stacks are reserved statically with [`task_define!`];
//! a task handle is simply `&'static Tcb`. All mutable TCB fields live in
//! per-field atomics so a TCB can be shared between cores, but multi-field
//! invariants are only maintained under the scheduler spin-lock: every
//! state transition in this module takes it.

use core::cell::UnsafeCell;
use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering};

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::config::{MAX_TASKS, STACK_GUARD_WORDS, TICK_INTERVAL_US};
use crate::errno::{KernelError, Result};
use crate::port::{CoreId, Port, PortTrait};
use crate::scheduler::{self, SchedulerState};

/// Handle to a statically allocated task.
pub type TaskRef = &'static Tcb;

/// The status of a task.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TaskStatus {
	Ready,
	Running,
	Blocked,
	Suspended,
}

/// Why a task is blocked.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum BlockedReason {
	None,
	Sleep,
	WaitSemaphore,
	WaitMutex,
	WaitMsgQueueData,
	WaitMsgQueueSpace,
	WaitCondVar,
	WaitTimer,
}

/// Why a blocked task was made ready again. Blocking primitives inspect
/// this after waking up to decide between success, timeout and retry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum WakeupReason {
	None,
	WaitTimeout,
	SleepTimeout,
	SemaphoreTaken,
	MutexLocked,
	MsgQueueDataAvailable,
	MsgQueueSpaceAvailable,
	CondVarSignalled,
	TimerTimeout,
	Resume,
}

/// Priority of a task. Lower values mean higher scheduling precedence.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub struct Priority(u8);

impl Priority {
	pub const fn into(self) -> u8 {
		self.0
	}

	pub const fn from(x: u8) -> Self {
		Priority(x)
	}
}

impl fmt::Display for Priority {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

pub const HIGHEST_PRIO: Priority = Priority::from(0);
pub const IDLE_PRIO: Priority = Priority::from(u8::MAX);

/// The set of cores a task may run on. Static after task definition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CoreAffinity {
	Any,
	Core(CoreId),
}

impl CoreAffinity {
	const ANY_RAW: u8 = u8::MAX;

	pub(crate) const fn into_raw(self) -> u8 {
		match self {
			CoreAffinity::Any => Self::ANY_RAW,
			CoreAffinity::Core(core) => core as u8,
		}
	}

	pub(crate) fn from_raw(raw: u8) -> Self {
		if raw == Self::ANY_RAW {
			CoreAffinity::Any
		} else {
			CoreAffinity::Core(raw.into())
		}
	}

	/// Is the task allowed to run on `core`?
	pub fn admits(self, core: CoreId) -> bool {
		match self {
			CoreAffinity::Any => true,
			CoreAffinity::Core(c) => c == core,
		}
	}
}

/// Statically reserved stack of a task, in 32-bit words.
#[repr(align(8))]
pub struct TaskStack<const N: usize>(UnsafeCell<[u32; N]>);

// The owning task has exclusive use of its stack region; the kernel only
// touches the saved stack pointer at context-switch points.
unsafe impl<const N: usize> Sync for TaskStack<N> {}

impl<const N: usize> TaskStack<N> {
	#[allow(clippy::new_without_default)]
	pub const fn new() -> Self {
		Self(UnsafeCell::new([0; N]))
	}

	pub const fn region(&self) -> StackRegion {
		StackRegion {
			base: self.0.get().cast::<u32>(),
			words: N,
		}
	}
}

/// Base and length of a task stack.
#[derive(Copy, Clone)]
pub struct StackRegion {
	base: *mut u32,
	words: usize,
}

// See `TaskStack`.
unsafe impl Send for StackRegion {}
unsafe impl Sync for StackRegion {}

impl StackRegion {
	pub fn base(self) -> *mut u32 {
		self.base
	}

	pub fn words(self) -> usize {
		self.words
	}

	/// Address just past the highest word; stacks grow downwards.
	pub fn top(self) -> usize {
		self.base as usize + self.words * 4
	}

	/// Highest address still inside the guard zone.
	pub fn guard_limit(self) -> usize {
		self.base as usize + STACK_GUARD_WORDS * 4
	}
}

/// A task control block.
pub struct Tcb {
	name: &'static str,
	entry: extern "C" fn(usize),
	params: usize,
	exit: fn() -> !,
	stack: StackRegion,
	/// Last stack pointer before a context switch to another task.
	stack_pointer: AtomicUsize,
	priority: AtomicU8,
	core_affinity: AtomicU8,
	status: AtomicU8,
	blocked_reason: AtomicU8,
	wakeup_reason: AtomicU8,
	remaining_sleep_ticks: AtomicU32,
}

impl Tcb {
	pub const fn new(
		name: &'static str,
		entry: extern "C" fn(usize),
		params: usize,
		stack: StackRegion,
		priority: u8,
		core_affinity: CoreAffinity,
	) -> Self {
		Self {
			name,
			entry,
			params,
			exit: default_exit,
			stack,
			stack_pointer: AtomicUsize::new(0),
			priority: AtomicU8::new(priority),
			core_affinity: AtomicU8::new(core_affinity.into_raw()),
			status: AtomicU8::new(TaskStatus::Ready as u8),
			blocked_reason: AtomicU8::new(BlockedReason::None as u8),
			wakeup_reason: AtomicU8::new(WakeupReason::None as u8),
			remaining_sleep_ticks: AtomicU32::new(0),
		}
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn entry(&self) -> extern "C" fn(usize) {
		self.entry
	}

	pub fn params(&self) -> usize {
		self.params
	}

	/// Function a port points the return address of the initial stack frame
	/// at, in case the entry function ever returns.
	pub fn exit_handler(&self) -> fn() -> ! {
		self.exit
	}

	pub fn stack(&self) -> StackRegion {
		self.stack
	}

	pub fn stack_top(&self) -> usize {
		self.stack.top()
	}

	pub fn stack_pointer(&self) -> usize {
		self.stack_pointer.load(Ordering::SeqCst)
	}

	pub fn set_stack_pointer(&self, stack_pointer: usize) {
		self.stack_pointer.store(stack_pointer, Ordering::SeqCst);
	}

	pub fn priority(&self) -> Priority {
		Priority::from(self.priority.load(Ordering::SeqCst))
	}

	pub(crate) fn set_priority_raw(&self, priority: Priority) {
		self.priority.store(priority.into(), Ordering::SeqCst);
	}

	pub fn core_affinity(&self) -> CoreAffinity {
		CoreAffinity::from_raw(self.core_affinity.load(Ordering::SeqCst))
	}

	pub fn status(&self) -> TaskStatus {
		TaskStatus::try_from(self.status.load(Ordering::SeqCst)).unwrap()
	}

	pub(crate) fn set_status(&self, status: TaskStatus) {
		self.status.store(status.into(), Ordering::SeqCst);
	}

	pub fn blocked_reason(&self) -> BlockedReason {
		BlockedReason::try_from(self.blocked_reason.load(Ordering::SeqCst)).unwrap()
	}

	pub(crate) fn set_blocked_reason(&self, reason: BlockedReason) {
		self.blocked_reason.store(reason.into(), Ordering::SeqCst);
	}

	pub fn wakeup_reason(&self) -> WakeupReason {
		WakeupReason::try_from(self.wakeup_reason.load(Ordering::SeqCst)).unwrap()
	}

	pub(crate) fn set_wakeup_reason(&self, reason: WakeupReason) {
		self.wakeup_reason.store(reason.into(), Ordering::SeqCst);
	}

	pub(crate) fn remaining_sleep_ticks(&self) -> u32 {
		self.remaining_sleep_ticks.load(Ordering::SeqCst)
	}

	pub(crate) fn set_sleep_ticks(&self, ticks: u32) {
		self.remaining_sleep_ticks.store(ticks, Ordering::SeqCst);
	}
}

/// Invoked if a task entry function returns. Tasks are not expected to.
pub fn default_exit() -> ! {
	loop {
		Port::wait_for_interrupt();
	}
}

/// Statically reserves a stack and a task control block.
///
/// ```ignore
/// task_define!(WORKER, worker_entry, 1024, 5);
/// task_define!(PINNED, worker_entry, 1024, 5, CoreAffinity::Core(1));
/// task_define!(PARAMD, worker_entry, 1024, 5, CoreAffinity::Any, 0xdead);
/// ```
#[macro_export]
macro_rules! task_define {
	($name:ident, $entry:path, $stack_words:expr, $priority:expr) => {
		$crate::task_define!(
			$name,
			$entry,
			$stack_words,
			$priority,
			$crate::task::CoreAffinity::Any,
			0
		);
	};
	($name:ident, $entry:path, $stack_words:expr, $priority:expr, $affinity:expr) => {
		$crate::task_define!($name, $entry, $stack_words, $priority, $affinity, 0);
	};
	($name:ident, $entry:path, $stack_words:expr, $priority:expr, $affinity:expr, $params:expr) => {
		static $name: $crate::task::Tcb = {
			static STACK: $crate::task::TaskStack<{ $stack_words }> =
				$crate::task::TaskStack::new();
			$crate::task::Tcb::new(
				stringify!($name),
				$entry,
				$params,
				STACK.region(),
				$priority,
				$affinity,
			)
		};
	};
}

/// Priority-ordered task queue.
///
/// Nodes come from a bounded arena of slots linked by `u16` indices; a slot
/// is recycled the moment its task leaves the queue. The ready queue keeps
/// tasks sorted ascending by priority with ties in insertion order, which
/// is what gives round robin among equals; the blocked queue inserts at the
/// front instead because retrieval scans the whole list anyway.
pub(crate) struct TaskQueue {
	slots: [QueueSlot; MAX_TASKS],
	head: u16,
	free: u16,
}

#[derive(Copy, Clone)]
struct QueueSlot {
	task: Option<TaskRef>,
	next: u16,
}

const NIL: u16 = u16::MAX;

impl TaskQueue {
	pub const fn new() -> Self {
		let mut slots = [QueueSlot {
			task: None,
			next: NIL,
		}; MAX_TASKS];

		let mut i = 0;
		while i + 1 < MAX_TASKS {
			slots[i].next = i as u16 + 1;
			i += 1;
		}

		Self {
			slots,
			head: NIL,
			free: 0,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.head == NIL
	}

	fn task_at(&self, idx: u16) -> TaskRef {
		self.slots[idx as usize].task.unwrap()
	}

	fn alloc(&mut self, task: TaskRef) -> u16 {
		let idx = self.free;
		assert!(idx != NIL, "task queue arena exhausted");
		self.free = self.slots[idx as usize].next;
		self.slots[idx as usize] = QueueSlot {
			task: Some(task),
			next: NIL,
		};
		idx
	}

	fn release(&mut self, idx: u16) {
		self.slots[idx as usize].task = None;
		self.slots[idx as usize].next = self.free;
		self.free = idx;
	}

	/// Inserts so the queue stays sorted ascending by priority. Equal
	/// priorities keep their insertion order.
	pub fn add(&mut self, task: TaskRef) {
		let idx = self.alloc(task);
		let priority = task.priority();

		if self.head == NIL || self.task_at(self.head).priority() > priority {
			self.slots[idx as usize].next = self.head;
			self.head = idx;
			return;
		}

		let mut cursor = self.head;
		loop {
			let next = self.slots[cursor as usize].next;
			if next == NIL || self.task_at(next).priority() > priority {
				break;
			}
			cursor = next;
		}

		self.slots[idx as usize].next = self.slots[cursor as usize].next;
		self.slots[cursor as usize].next = idx;
	}

	/// Inserts at the front without ordering.
	pub fn add_front(&mut self, task: TaskRef) {
		let idx = self.alloc(task);
		self.slots[idx as usize].next = self.head;
		self.head = idx;
	}

	/// Unlinks the first node holding `task`. Returns whether it was found.
	pub fn remove(&mut self, task: TaskRef) -> bool {
		let mut prev = NIL;
		let mut cursor = self.head;

		while cursor != NIL {
			let next = self.slots[cursor as usize].next;
			if ptr::eq(self.task_at(cursor), task) {
				if prev == NIL {
					self.head = next;
				} else {
					self.slots[prev as usize].next = next;
				}
				self.release(cursor);
				return true;
			}
			prev = cursor;
			cursor = next;
		}

		false
	}

	pub fn contains(&self, task: TaskRef) -> bool {
		self.iter().any(|queued| ptr::eq(queued, task))
	}

	/// Removes and returns the first task whose affinity admits `core`.
	pub fn get_for_core(&mut self, core: CoreId) -> Option<TaskRef> {
		let mut prev = NIL;
		let mut cursor = self.head;

		while cursor != NIL {
			let next = self.slots[cursor as usize].next;
			let task = self.task_at(cursor);
			if task.core_affinity().admits(core) {
				if prev == NIL {
					self.head = next;
				} else {
					self.slots[prev as usize].next = next;
				}
				self.release(cursor);
				return Some(task);
			}
			prev = cursor;
			cursor = next;
		}

		None
	}

	/// Like [`get_for_core`](Self::get_for_core) without removal.
	pub fn peek_for_core(&self, core: CoreId) -> Option<TaskRef> {
		self.iter().find(|task| task.core_affinity().admits(core))
	}

	/// Removes and returns the front task regardless of affinity.
	pub fn pop(&mut self) -> Option<TaskRef> {
		if self.head == NIL {
			return None;
		}
		let idx = self.head;
		let task = self.task_at(idx);
		self.head = self.slots[idx as usize].next;
		self.release(idx);
		Some(task)
	}

	/// Wakee selection for `core`: pops the first eligible waiter, dropping
	/// Suspended entries on the way. A dropped waiter re-enqueues itself
	/// from its retry loop once it is resumed.
	pub fn get_unsuspended_for_core(&mut self, core: CoreId) -> Option<TaskRef> {
		while let Some(task) = self.get_for_core(core) {
			if task.status() != TaskStatus::Suspended {
				return Some(task);
			}
		}
		None
	}

	/// Like [`get_unsuspended_for_core`](Self::get_unsuspended_for_core)
	/// but affinity-blind; used by condition variables.
	pub fn pop_unsuspended(&mut self) -> Option<TaskRef> {
		while let Some(task) = self.pop() {
			if task.status() != TaskStatus::Suspended {
				return Some(task);
			}
		}
		None
	}

	pub fn iter(&self) -> impl Iterator<Item = TaskRef> + '_ {
		let mut cursor = self.head;
		core::iter::from_fn(move || {
			if cursor == NIL {
				return None;
			}
			let task = self.task_at(cursor);
			cursor = self.slots[cursor as usize].next;
			Some(task)
		})
	}
}

/// Transitions `task` to Ready with the given wakeup reason, moving it out
/// of the blocked queue if necessary. Caller holds the scheduler lock.
pub(crate) fn set_ready_locked(state: &mut SchedulerState, task: TaskRef, reason: WakeupReason) {
	if task.status() == TaskStatus::Blocked {
		state.blocked_queue.remove(task);
	}

	task.set_status(TaskStatus::Ready);
	task.set_blocked_reason(BlockedReason::None);
	task.set_wakeup_reason(reason);
	task.set_sleep_ticks(0);

	if !state.ready_queue.contains(task) {
		state.ready_queue.add(task);
	}

	debug!("task {} is ready ({:?})", task.name(), reason);
}

pub(crate) fn set_ready(task: TaskRef, reason: WakeupReason) {
	let mut state = scheduler::state();
	set_ready_locked(&mut state, task, reason);
}

/// Blocks the calling task for `wait_ticks` ticks (`None` = indefinitely)
/// and gives up the CPU. The wakeup reason tells the caller why it resumed.
pub(crate) fn block_current(reason: BlockedReason, wait_ticks: Option<u32>) {
	let Some(task) = current() else {
		return;
	};

	{
		let mut state = scheduler::state();
		task.set_sleep_ticks(wait_ticks.unwrap_or(0));
		task.set_status(TaskStatus::Blocked);
		task.set_blocked_reason(reason);
		task.set_wakeup_reason(WakeupReason::None);
		if !state.blocked_queue.contains(task) {
			state.blocked_queue.add_front(task);
		}
		debug!("blocking task {} ({:?})", task.name(), reason);
	}

	scheduler::yield_now();
}

/// Places `task` on the ready queue. Before the scheduler is started this
/// only registers the task; afterwards the task competes for the CPU from
/// the next scheduling point on. Starting an already started task is a
/// no-op.
pub fn start(task: TaskRef) {
	let mut state = scheduler::state();

	if task.status() == TaskStatus::Running || state.ready_queue.contains(task) {
		return;
	}

	Port::init_stack_frame(task);
	task.set_status(TaskStatus::Ready);
	state.ready_queue.add(task);
	debug!("started task {} with priority {}", task.name(), task.priority());
}

/// Takes `task` out of scheduling until [`resume`] is called. Suspending
/// the calling task gives up the CPU immediately.
pub fn suspend(task: TaskRef) {
	{
		let mut state = scheduler::state();

		match task.status() {
			TaskStatus::Ready => {
				state.ready_queue.remove(task);
			}
			TaskStatus::Blocked => {
				state.blocked_queue.remove(task);
			}
			TaskStatus::Running | TaskStatus::Suspended => {}
		}

		task.set_sleep_ticks(0);
		task.set_status(TaskStatus::Suspended);
		task.set_blocked_reason(BlockedReason::None);
		task.set_wakeup_reason(WakeupReason::None);
		debug!("suspended task {}", task.name());
	}

	if let Some(current) = current() {
		if ptr::eq(current, task) {
			scheduler::yield_now();
		}
	}
}

/// Makes a suspended task ready again.
pub fn resume(task: TaskRef) -> Result {
	if task.status() != TaskStatus::Suspended {
		return Err(KernelError::NotSuspended);
	}

	set_ready(task, WakeupReason::Resume);
	Ok(())
}

/// The task currently running on the calling core.
pub fn current() -> Option<TaskRef> {
	scheduler::current_on(Port::core_id())
}

/// Blocks the calling task for `ticks` scheduler ticks.
pub fn sleep_ticks(ticks: u32) {
	if ticks == 0 {
		return;
	}
	block_current(BlockedReason::Sleep, Some(ticks));
}

/// Blocks the calling task for `ms` milliseconds, rounded down to whole
/// ticks.
pub fn sleep_ms(ms: u32) {
	sleep_ticks((u64::from(ms) * 1000 / u64::from(TICK_INTERVAL_US)) as u32);
}

/// Blocks the calling task for `us` microseconds, rounded down to whole
/// ticks.
pub fn sleep_us(us: u32) {
	sleep_ticks(us / TICK_INTERVAL_US);
}

/// Changes the priority of a task, repositioning it in the ready queue if
/// it is queued there.
pub fn set_priority(task: TaskRef, priority: Priority) {
	let mut state = scheduler::state();

	task.set_priority_raw(priority);
	if task.status() == TaskStatus::Ready && state.ready_queue.remove(task) {
		state.ready_queue.add(task);
	}
}

pub fn priority(task: TaskRef) -> Priority {
	task.priority()
}

/// Pins `task` to a core, or makes it migratable with
/// [`CoreAffinity::Any`]. Must be called before the task is started.
pub fn set_core_affinity(task: TaskRef, affinity: CoreAffinity) {
	task.core_affinity
		.store(affinity.into_raw(), Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
	use super::*;

	extern "C" fn noop_entry(_arg: usize) {}

	#[test]
	fn queue_orders_by_priority_with_fifo_ties() {
		crate::task_define!(LOW, noop_entry, 16, 9);
		crate::task_define!(MID_A, noop_entry, 16, 5);
		crate::task_define!(MID_B, noop_entry, 16, 5);
		crate::task_define!(HIGH, noop_entry, 16, 1);

		let mut queue = TaskQueue::new();
		queue.add(&LOW);
		queue.add(&MID_A);
		queue.add(&MID_B);
		queue.add(&HIGH);

		let order: std::vec::Vec<&str> = queue.iter().map(|t| t.name()).collect();
		assert_eq!(order, ["HIGH", "MID_A", "MID_B", "LOW"]);
	}

	#[test]
	fn queue_front_insert_is_unordered() {
		crate::task_define!(FIRST, noop_entry, 16, 1);
		crate::task_define!(SECOND, noop_entry, 16, 9);

		let mut queue = TaskQueue::new();
		queue.add_front(&FIRST);
		queue.add_front(&SECOND);

		assert!(ptr::eq(queue.pop().unwrap(), &SECOND));
		assert!(ptr::eq(queue.pop().unwrap(), &FIRST));
		assert!(queue.pop().is_none());
	}

	#[test]
	fn queue_remove_unlinks_anywhere() {
		crate::task_define!(A, noop_entry, 16, 1);
		crate::task_define!(B, noop_entry, 16, 2);
		crate::task_define!(C, noop_entry, 16, 3);

		let mut queue = TaskQueue::new();
		queue.add(&A);
		queue.add(&B);
		queue.add(&C);

		assert!(queue.remove(&B));
		assert!(!queue.remove(&B));
		assert!(queue.contains(&A));
		assert!(!queue.contains(&B));

		let order: std::vec::Vec<&str> = queue.iter().map(|t| t.name()).collect();
		assert_eq!(order, ["A", "C"]);
	}

	#[test]
	fn queue_retrieval_respects_affinity() {
		crate::task_define!(PINNED, noop_entry, 16, 1, CoreAffinity::Core(1));
		crate::task_define!(FLOATING, noop_entry, 16, 5);

		let mut queue = TaskQueue::new();
		queue.add(&PINNED);
		queue.add(&FLOATING);

		// Core 0 must skip the higher-priority task pinned to core 1.
		assert!(ptr::eq(queue.peek_for_core(0).unwrap(), &FLOATING));
		assert!(ptr::eq(queue.get_for_core(0).unwrap(), &FLOATING));
		assert!(queue.get_for_core(0).is_none());
		assert!(ptr::eq(queue.get_for_core(1).unwrap(), &PINNED));
	}

	#[test]
	fn queue_arena_recycles_slots() {
		crate::task_define!(CYCLED, noop_entry, 16, 4);

		let mut queue = TaskQueue::new();
		for _ in 0..10 * MAX_TASKS {
			queue.add(&CYCLED);
			assert!(ptr::eq(queue.pop().unwrap(), &CYCLED));
		}
		assert!(queue.is_empty());
	}
}
