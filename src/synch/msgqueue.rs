//! Bounded FIFO message queue.

use crate::errno::{KernelError, Result};
use crate::port::{Port, PortTrait};
use crate::scheduler::{self, task};
use crate::synch::spinlock::SpinIrqLock;
use crate::task::{BlockedReason, TaskQueue, WakeupReason};

struct MsgQueueState<const N: usize> {
	buffer: [u8; N],
	/// Byte offsets into `buffer`; always a multiple of the item size.
	read_idx: usize,
	write_idx: usize,
	item_count: usize,
	producer_wait: TaskQueue,
	consumer_wait: TaskQueue,
}

/// A bounded ring of fixed-size items with producer and consumer blocking.
///
/// `N` is the backing buffer in bytes and must equal
/// `item_size * queue_length`.
///
/// ```ignore
/// // Four-byte items, two slots.
/// static EVENTS: MsgQueue<8> = MsgQueue::new(4, 2);
/// ```
pub struct MsgQueue<const N: usize> {
	item_size: usize,
	queue_length: usize,
	state: SpinIrqLock<MsgQueueState<N>>,
}

impl<const N: usize> MsgQueue<N> {
	pub const fn new(item_size: usize, queue_length: usize) -> Self {
		assert!(item_size > 0 && queue_length > 0);
		assert!(
			item_size * queue_length == N,
			"buffer length must equal item_size * queue_length"
		);

		Self {
			item_size,
			queue_length,
			state: SpinIrqLock::new(MsgQueueState {
				buffer: [0; N],
				read_idx: 0,
				write_idx: 0,
				item_count: 0,
				producer_wait: TaskQueue::new(),
				consumer_wait: TaskQueue::new(),
			}),
		}
	}

	pub fn item_size(&self) -> usize {
		self.item_size
	}

	pub fn capacity(&self) -> usize {
		self.queue_length
	}

	/// Number of queued items.
	pub fn len(&self) -> usize {
		self.state.lock().item_count
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Copies one item into the queue, waiting up to `wait_ticks` ticks for
	/// space (`Some(0)` never waits, `None` waits forever). `item` must be
	/// exactly one item long.
	pub fn send(&self, item: &[u8], wait_ticks: Option<u32>) -> Result {
		if item.len() != self.item_size {
			return Err(KernelError::InvalidArgument);
		}

		loop {
			if self.buffer_write(item) {
				return Ok(());
			}

			if wait_ticks == Some(0) {
				return Err(KernelError::Full);
			}
			let Some(current) = task::current() else {
				return Err(KernelError::Full);
			};

			{
				let mut state = self.state.lock();
				if !state.producer_wait.contains(current) {
					state.producer_wait.add(current);
				}
			}

			task::block_current(BlockedReason::WaitMsgQueueSpace, wait_ticks);

			match current.wakeup_reason() {
				// Space was reported; retry the bounded write, which may
				// fail again if another producer was faster.
				WakeupReason::MsgQueueSpaceAvailable => {}
				WakeupReason::WaitTimeout => {
					self.state.lock().producer_wait.remove(current);
					return Err(KernelError::Timeout);
				}
				// Suspended while waiting and later resumed: try again.
				_ => {}
			}
		}
	}

	/// Copies one item out of the queue into `out`, waiting up to
	/// `wait_ticks` ticks for data.
	pub fn receive(&self, out: &mut [u8], wait_ticks: Option<u32>) -> Result {
		if out.len() != self.item_size {
			return Err(KernelError::InvalidArgument);
		}

		loop {
			if self.buffer_read(out) {
				return Ok(());
			}

			if wait_ticks == Some(0) {
				return Err(KernelError::Empty);
			}
			let Some(current) = task::current() else {
				return Err(KernelError::Empty);
			};

			{
				let mut state = self.state.lock();
				if !state.consumer_wait.contains(current) {
					state.consumer_wait.add(current);
				}
			}

			task::block_current(BlockedReason::WaitMsgQueueData, wait_ticks);

			match current.wakeup_reason() {
				WakeupReason::MsgQueueDataAvailable => {}
				WakeupReason::WaitTimeout => {
					self.state.lock().consumer_wait.remove(current);
					return Err(KernelError::Timeout);
				}
				_ => {}
			}
		}
	}

	/// Non-blocking send; the variant to use from interrupt handlers.
	pub fn try_send(&self, item: &[u8]) -> Result {
		self.send(item, Some(0))
	}

	/// Non-blocking receive; the variant to use from interrupt handlers.
	pub fn try_receive(&self, out: &mut [u8]) -> Result {
		self.receive(out, Some(0))
	}

	/// Bounded write: copies `item` in and wakes one consumer. Returns
	/// `false` untouched if the ring is full.
	fn buffer_write(&self, item: &[u8]) -> bool {
		let wakee = {
			let mut state = self.state.lock();

			if state.item_count == self.queue_length {
				return false;
			}

			let write_idx = state.write_idx;
			state.buffer[write_idx..write_idx + self.item_size].copy_from_slice(item);
			state.write_idx = (write_idx + self.item_size) % N;
			state.item_count += 1;

			let wakee = state.consumer_wait.get_unsuspended_for_core(Port::core_id());
			if let Some(consumer) = wakee {
				task::set_ready(consumer, WakeupReason::MsgQueueDataAvailable);
			}
			wakee
		};

		if let Some(consumer) = wakee {
			if scheduler::should_preempt(consumer) {
				scheduler::yield_now();
			}
		}

		true
	}

	/// Bounded read: copies one item out and wakes one producer. Returns
	/// `false` untouched if the ring is empty.
	fn buffer_read(&self, out: &mut [u8]) -> bool {
		let wakee = {
			let mut state = self.state.lock();

			if state.item_count == 0 {
				return false;
			}

			let read_idx = state.read_idx;
			out.copy_from_slice(&state.buffer[read_idx..read_idx + self.item_size]);
			state.read_idx = (read_idx + self.item_size) % N;
			state.item_count -= 1;

			let wakee = state.producer_wait.get_unsuspended_for_core(Port::core_id());
			if let Some(producer) = wakee {
				task::set_ready(producer, WakeupReason::MsgQueueSpaceAvailable);
			}
			wakee
		};

		if let Some(producer) = wakee {
			if scheduler::should_preempt(producer) {
				scheduler::yield_now();
			}
		}

		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	// The scheduler is not started here, so the bounded paths run without
	// any task bookkeeping.

	#[test]
	fn ring_round_trips_in_order() {
		let queue: MsgQueue<12> = MsgQueue::new(4, 3);

		queue.try_send(b"aaaa").unwrap();
		queue.try_send(b"bbbb").unwrap();
		queue.try_send(b"cccc").unwrap();

		let mut out = [0u8; 4];
		queue.try_receive(&mut out).unwrap();
		assert_eq!(&out, b"aaaa");
		queue.try_receive(&mut out).unwrap();
		assert_eq!(&out, b"bbbb");
		queue.try_receive(&mut out).unwrap();
		assert_eq!(&out, b"cccc");
		assert_eq!(queue.try_receive(&mut out), Err(KernelError::Empty));
	}

	#[test]
	fn full_ring_rejects_without_mutation() {
		let queue: MsgQueue<8> = MsgQueue::new(4, 2);

		queue.try_send(b"1111").unwrap();
		queue.try_send(b"2222").unwrap();
		assert_eq!(queue.try_send(b"3333"), Err(KernelError::Full));
		assert_eq!(queue.len(), 2);

		// The rejected send must not have clobbered the ring.
		let mut out = [0u8; 4];
		queue.try_receive(&mut out).unwrap();
		assert_eq!(&out, b"1111");
	}

	#[test]
	fn indices_wrap_at_capacity() {
		let queue: MsgQueue<8> = MsgQueue::new(4, 2);
		let mut out = [0u8; 4];

		// Drive the byte offsets through several wraps.
		for round in 0u8..10 {
			let item = [round; 4];
			queue.try_send(&item).unwrap();
			queue.try_receive(&mut out).unwrap();
			assert_eq!(out, item);
		}
		assert!(queue.is_empty());
	}

	#[test]
	fn item_size_is_enforced() {
		let queue: MsgQueue<8> = MsgQueue::new(4, 2);
		let mut short = [0u8; 2];

		assert_eq!(queue.try_send(b"toolong"), Err(KernelError::InvalidArgument));
		assert_eq!(
			queue.try_receive(&mut short),
			Err(KernelError::InvalidArgument)
		);
	}
}
