//! A sleeping task hands the CPU to the next-priority task and preempts it
//! back when its sleep elapses.

mod common;

use kestrel::port::host;
use kestrel::task::{self, CoreAffinity, TaskStatus, WakeupReason};
use kestrel::task_define;

task_define!(
	TASK_A,
	common::noop_entry,
	64,
	5,
	CoreAffinity::Core(0)
);
task_define!(
	TASK_B,
	common::noop_entry,
	64,
	1,
	CoreAffinity::Core(0)
);

#[test]
fn sleeping_task_yields_and_preempts_back() {
	common::boot(&[&TASK_A, &TASK_B]);

	// B outranks A.
	assert!(common::is_current(&TASK_B), "current is {}", common::current_name());

	// B goes to sleep for ten ticks; A takes over.
	task::sleep_ticks(10);
	assert_eq!(TASK_B.status(), TaskStatus::Blocked);
	assert!(common::is_current(&TASK_A));

	// Nine ticks later B is still asleep.
	host::advance_ticks(9);
	assert!(common::is_current(&TASK_A));
	assert_eq!(TASK_B.status(), TaskStatus::Blocked);

	// The tenth tick wakes B, which immediately preempts A.
	host::advance_ticks(1);
	assert!(common::is_current(&TASK_B));
	assert_eq!(TASK_B.wakeup_reason(), WakeupReason::SleepTimeout);
	assert_eq!(TASK_A.status(), TaskStatus::Ready);

	// Millisecond sleeps convert through the tick interval (1 ms a tick).
	task::sleep_ms(3);
	assert!(common::is_current(&TASK_A));
	host::advance_ticks(3);
	assert!(common::is_current(&TASK_B));
}
