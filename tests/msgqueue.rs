//! Message-queue boundary behavior and producer/consumer blocking.
//!
//! Interleaving: T1 (priority 5) blocks on the full/empty queue; the
//! scripted actions run as T2 (priority 9) and make space or data.

mod common;

use kestrel::port::host;
use kestrel::synch::MsgQueue;
use kestrel::task::{CoreAffinity, TaskStatus};
use kestrel::{KernelError, task_define};

task_define!(TASK_T1, common::noop_entry, 64, 5, CoreAffinity::Core(0));
task_define!(TASK_T2, common::noop_entry, 64, 9, CoreAffinity::Core(0));

// Two slots of four bytes each.
static QUEUE: MsgQueue<8> = MsgQueue::new(4, 2);

fn drain_one_as_t2() {
	assert!(common::is_current(&TASK_T2));
	assert_eq!(TASK_T1.status(), TaskStatus::Blocked);

	let mut out = [0u8; 4];
	QUEUE.try_receive(&mut out).unwrap();
	assert_eq!(&out, b"aaaa");
}

fn send_one_as_t2() {
	assert!(common::is_current(&TASK_T2));
	assert_eq!(TASK_T1.status(), TaskStatus::Blocked);

	QUEUE.try_send(b"eeee").unwrap();
}

#[test]
fn boundary_and_blocking() {
	common::boot(&[&TASK_T1, &TASK_T2]);
	assert!(common::is_current(&TASK_T1));

	// Fill the queue; the third send fails without touching the ring.
	QUEUE.send(b"aaaa", Some(0)).unwrap();
	QUEUE.send(b"bbbb", Some(0)).unwrap();
	assert_eq!(QUEUE.send(b"cccc", Some(0)), Err(KernelError::Full));
	assert_eq!(QUEUE.len(), 2);

	// Drain one, refill, then drain in order.
	let mut out = [0u8; 4];
	QUEUE.receive(&mut out, Some(0)).unwrap();
	assert_eq!(&out, b"aaaa");
	QUEUE.send(b"cccc", Some(0)).unwrap();
	QUEUE.receive(&mut out, Some(0)).unwrap();
	assert_eq!(&out, b"bbbb");
	QUEUE.receive(&mut out, Some(0)).unwrap();
	assert_eq!(&out, b"cccc");
	assert_eq!(QUEUE.receive(&mut out, Some(0)), Err(KernelError::Empty));

	// Blocking producer: the queue is full, T2 makes space.
	QUEUE.send(b"aaaa", Some(0)).unwrap();
	QUEUE.send(b"bbbb", Some(0)).unwrap();
	host::push_switch_action(drain_one_as_t2);
	QUEUE.send(b"dddd", None).unwrap();
	assert!(common::is_current(&TASK_T1));
	assert_eq!(QUEUE.len(), 2);

	QUEUE.receive(&mut out, Some(0)).unwrap();
	assert_eq!(&out, b"bbbb");
	QUEUE.receive(&mut out, Some(0)).unwrap();
	assert_eq!(&out, b"dddd");

	// Blocking consumer: the queue is empty, T2 sends.
	host::push_switch_action(send_one_as_t2);
	QUEUE.receive(&mut out, None).unwrap();
	assert_eq!(&out, b"eeee");
	assert!(common::is_current(&TASK_T1));

	// A producer timeout cleans up the wait queue.
	QUEUE.send(b"aaaa", Some(0)).unwrap();
	QUEUE.send(b"bbbb", Some(0)).unwrap();
	host::push_switch_action(let_wait_elapse);
	assert_eq!(QUEUE.send(b"xxxx", Some(4)), Err(KernelError::Timeout));
	assert!(common::is_current(&TASK_T1));
}

fn let_wait_elapse() {
	assert!(common::is_current(&TASK_T2));
	host::advance_ticks(4);
}
