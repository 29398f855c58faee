//! Shared plumbing for the scenario tests.
//!
//! Every scenario lives in its own test binary because the scheduler is a
//! process-wide singleton. The host port stands in for the hardware: ticks
//! are injected with `host::advance_ticks`, and whenever a blocking call
//! hands the CPU over, the port pops the next scripted switch action and
//! runs it in the place of the task that just became current. A scripted
//! action therefore plays the role of "what the other task does next";
//! it must leave the simulated current task equal to the task whose
//! blocked frame resumes when the action returns (ending the action with
//! a wakeup that preempts, or a yield, does this naturally).

#![allow(dead_code)]

use core::ptr;

use kestrel::scheduler;
use kestrel::task::{self, TaskRef};
use kestrel::timer;

pub extern "C" fn noop_entry(_arg: usize) {
	// Task bodies never execute under the host port; the tests drive the
	// kernel in their place.
}

/// Starts `tasks` and the scheduler, then parks the timer service task
/// exactly the way its own loop would. On return the highest-priority
/// application task is current on core 0.
pub fn boot(tasks: &[TaskRef]) {
	kestrel::logging::init(log::LevelFilter::Warn);

	for started in tasks.iter().copied() {
		task::start(started);
	}
	scheduler::start();

	// The service task always boots first; park it until a timer fires.
	assert!(is_current(timer::service_task()));
	assert_eq!(timer::run_pending(), 0);
	timer::wait_for_timeouts();
}

pub fn is_current(task: TaskRef) -> bool {
	matches!(task::current(), Some(current) if ptr::eq(current, task))
}

pub fn current_name() -> &'static str {
	task::current().map_or("<none>", |task| task.name())
}
