//! Mutex ownership, priority inheritance and the direct ownership
//! hand-off on unlock.
//!
//! Interleaving: L (priority 10) takes the mutex first. H (priority 1)
//! then blocks on it, boosting L; the scripted action runs in L's place,
//! asserts the boost, and unlocks, which hands the mutex straight to H.

mod common;

use core::ptr;

use kestrel::port::host;
use kestrel::synch::Mutex;
use kestrel::task::{self, CoreAffinity, Priority};
use kestrel::{KernelError, task_define};

task_define!(TASK_H, common::noop_entry, 64, 1, CoreAffinity::Core(0));
task_define!(TASK_L, common::noop_entry, 64, 10, CoreAffinity::Core(0));

static MUTEX: Mutex = Mutex::new();

fn unlock_as_l() {
	// H is blocked on the mutex; inheritance must have boosted L.
	assert!(common::is_current(&TASK_L));
	assert_eq!(task::priority(&TASK_L), Priority::from(1));
	assert!(ptr::eq(MUTEX.owner().unwrap(), &TASK_L));

	// Unlock restores L's priority and hands ownership straight to H,
	// which preempts us.
	MUTEX.unlock().unwrap();
	assert_eq!(task::priority(&TASK_L), Priority::from(10));
}

#[test]
fn priority_inheritance_and_handoff() {
	common::boot(&[&TASK_H, &TASK_L]);
	assert!(common::is_current(&TASK_H));

	// Get L running first: H sleeps, L locks the mutex.
	task::sleep_ticks(50);
	assert!(common::is_current(&TASK_L));
	MUTEX.lock(None).unwrap();
	assert!(MUTEX.is_locked());

	// Locking again from the owner would deadlock; a bounded attempt from
	// another task reports Busy. (Checked from L's context for the
	// no-wait path only.)
	assert_eq!(MUTEX.unlock(), Ok(()));
	MUTEX.lock(None).unwrap();

	// Unlocking from a non-owner is refused.
	host::advance_ticks(50);
	assert!(common::is_current(&TASK_H));
	assert_eq!(MUTEX.unlock(), Err(KernelError::NotOwner));

	// A bounded lock attempt does not boost forever, it just fails fast.
	assert_eq!(MUTEX.lock(Some(0)), Err(KernelError::Busy));

	// Now block on the mutex for real. The scripted action runs as L.
	host::push_switch_action(unlock_as_l);
	MUTEX.lock(None).unwrap();

	// H owns the mutex, L is back at its default priority.
	assert!(common::is_current(&TASK_H));
	assert!(ptr::eq(MUTEX.owner().unwrap(), &TASK_H));
	assert_eq!(task::priority(&TASK_L), Priority::from(10));

	MUTEX.unlock().unwrap();
	assert!(!MUTEX.is_locked());
	assert!(MUTEX.owner().is_none());

	// Unlocking an unlocked mutex: the owner check fires first.
	assert_eq!(MUTEX.unlock(), Err(KernelError::NotOwner));
}
