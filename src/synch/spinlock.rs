//! Spin-lock with interrupt guard.
//!
//! [`SpinIrqLock`] is the only way kernel code mutates shared scheduler
//! state or the internal state of a synchronization primitive. Acquisition
//! masks interrupts on the calling core and, in SMP builds, spins on a
//! ticket lock; the guard restores both on drop. The enclosed region must
//! be short and bounded and must never reach a suspension point.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
#[cfg(feature = "smp")]
use core::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "smp")]
use crossbeam_utils::{Backoff, CachePadded};

use crate::port::{Port, PortTrait};

/// A ticket lock that also masks local interrupts while held.
///
/// On single-core builds the ticket machinery compiles away and the lock
/// degenerates to the interrupt mask, which is already sufficient for
/// mutual exclusion there.
pub struct SpinIrqLock<T: ?Sized> {
	#[cfg(feature = "smp")]
	queue: CachePadded<AtomicUsize>,
	#[cfg(feature = "smp")]
	dequeue: CachePadded<AtomicUsize>,
	data: UnsafeCell<T>,
}

/// Grants access to the protected data; releasing the lock and restoring
/// the interrupt state happen when the guard falls out of scope.
pub struct SpinIrqLockGuard<'a, T: ?Sized> {
	#[cfg(feature = "smp")]
	dequeue: &'a CachePadded<AtomicUsize>,
	#[cfg(feature = "smp")]
	ticket: usize,
	irq: bool,
	data: &'a mut T,
}

// The lock discipline makes the inner data single-owner while the guard
// lives, as with any mutex.
unsafe impl<T: ?Sized + Send> Sync for SpinIrqLock<T> {}
unsafe impl<T: ?Sized + Send> Send for SpinIrqLock<T> {}

impl<T> SpinIrqLock<T> {
	pub const fn new(data: T) -> Self {
		Self {
			#[cfg(feature = "smp")]
			queue: CachePadded::new(AtomicUsize::new(0)),
			#[cfg(feature = "smp")]
			dequeue: CachePadded::new(AtomicUsize::new(1)),
			data: UnsafeCell::new(data),
		}
	}
}

impl<T: ?Sized> SpinIrqLock<T> {
	#[cfg(feature = "smp")]
	pub fn lock(&self) -> SpinIrqLockGuard<'_, T> {
		let irq = Port::irq_save();
		let backoff = Backoff::new();
		let ticket = self.queue.fetch_add(1, Ordering::Relaxed) + 1;

		while self.dequeue.load(Ordering::Acquire) != ticket {
			backoff.spin();
		}

		SpinIrqLockGuard {
			dequeue: &self.dequeue,
			ticket,
			irq,
			data: unsafe { &mut *self.data.get() },
		}
	}

	#[cfg(not(feature = "smp"))]
	pub fn lock(&self) -> SpinIrqLockGuard<'_, T> {
		let irq = Port::irq_save();
		SpinIrqLockGuard {
			irq,
			data: unsafe { &mut *self.data.get() },
		}
	}
}

impl<T: ?Sized> Deref for SpinIrqLockGuard<'_, T> {
	type Target = T;

	fn deref(&self) -> &T {
		&*self.data
	}
}

impl<T: ?Sized> DerefMut for SpinIrqLockGuard<'_, T> {
	fn deref_mut(&mut self) -> &mut T {
		&mut *self.data
	}
}

impl<T: ?Sized> Drop for SpinIrqLockGuard<'_, T> {
	fn drop(&mut self) {
		#[cfg(feature = "smp")]
		self.dequeue.store(self.ticket + 1, Ordering::Release);
		Port::memory_barrier();
		Port::irq_restore(self.irq);
	}
}
