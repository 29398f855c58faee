//! Condition-variable waits: spurious resume must re-enter the wait, and
//! both the success and the timeout path return with the mutex held.
//!
//! Interleaving for the spurious-resume phase: T (priority 5) waits on the
//! condvar. The first action runs as the helper H (priority 9), suspends
//! and resumes T without signalling, and yields back to it; T's wait loop
//! observes the resume and blocks again, at which point the second action
//! (queued by the first one after its yield) signals for real.

mod common;

use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

use kestrel::port::host;
use kestrel::synch::{CondVar, Mutex};
use kestrel::task::{self, BlockedReason, CoreAffinity, TaskStatus};
use kestrel::{KernelError, task_define};

task_define!(TASK_T, common::noop_entry, 64, 5, CoreAffinity::Core(0));
task_define!(TASK_H, common::noop_entry, 64, 9, CoreAffinity::Core(0));

static MUTEX: Mutex = Mutex::new();
static COND: CondVar = CondVar::new(&MUTEX);

static RESUMED_WITHOUT_SIGNAL: AtomicBool = AtomicBool::new(false);
static SIGNALLED: AtomicBool = AtomicBool::new(false);

fn spurious_resume_as_h() {
	assert!(common::is_current(&TASK_H));
	assert_eq!(TASK_T.status(), TaskStatus::Blocked);

	// Suspend and resume the waiter without any signal.
	task::suspend(&TASK_T);
	task::resume(&TASK_T).unwrap();
	RESUMED_WITHOUT_SIGNAL.store(true, Ordering::SeqCst);

	// Hand the CPU back to T so its wait loop sees the resume. Only after
	// that yield do we queue the real signal; T re-blocks first.
	kestrel::scheduler::yield_now();
	host::push_switch_action(signal_as_h);
}

fn signal_as_h() {
	assert!(common::is_current(&TASK_H));

	// T went back to waiting instead of returning spuriously.
	assert_eq!(TASK_T.status(), TaskStatus::Blocked);
	assert_eq!(TASK_T.blocked_reason(), BlockedReason::WaitCondVar);

	SIGNALLED.store(true, Ordering::SeqCst);
	COND.signal().unwrap();
}

fn let_wait_elapse() {
	assert!(common::is_current(&TASK_H));
	host::advance_ticks(5);
}

#[test]
fn spurious_resume_rewaits_and_mutex_is_reacquired() {
	common::boot(&[&TASK_T, &TASK_H]);
	assert!(common::is_current(&TASK_T));

	// Signalling with nobody waiting reports NoTask.
	assert_eq!(COND.signal(), Err(KernelError::NoTask));
	assert_eq!(COND.broadcast(), Err(KernelError::NoTask));

	// The wait contract requires holding the mutex.
	MUTEX.lock(None).unwrap();

	host::push_switch_action(spurious_resume_as_h);
	COND.wait(None).unwrap();

	// The wait only ended on the real signal, with the mutex ours again.
	assert!(RESUMED_WITHOUT_SIGNAL.load(Ordering::SeqCst));
	assert!(SIGNALLED.load(Ordering::SeqCst));
	assert!(common::is_current(&TASK_T));
	assert!(ptr::eq(MUTEX.owner().unwrap(), &TASK_T));

	// Timeout path: the mutex is reacquired as well.
	host::push_switch_action(let_wait_elapse);
	assert_eq!(COND.wait(Some(5)), Err(KernelError::Timeout));
	assert!(ptr::eq(MUTEX.owner().unwrap(), &TASK_T));

	// Broadcast wakes a waiter just like signal does.
	host::push_switch_action(broadcast_as_h);
	COND.wait(None).unwrap();
	assert!(ptr::eq(MUTEX.owner().unwrap(), &TASK_T));

	MUTEX.unlock().unwrap();
}

fn broadcast_as_h() {
	assert!(common::is_current(&TASK_H));
	COND.broadcast().unwrap();

	// Broadcast does not yield; let the ordinary scheduling rules hand the
	// CPU back to the woken waiter.
	kestrel::scheduler::yield_now();
}
