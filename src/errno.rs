//! Kernel result codes.
//!
//! Every fallible kernel operation reports its outcome through
//! [`KernelError`]. Wait timeouts and resource-contention outcomes are
//! ordinary returns that the application is expected to interpret; contract
//! violations do not surface here, they are fatal precondition checks.

use thiserror::Error;

/// The error half of every fallible kernel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KernelError {
	/// Invalid argument or invalid operation.
	#[error("invalid argument")]
	InvalidArgument,
	/// A bounded wait elapsed before the resource became available.
	#[error("wait timed out")]
	Timeout,
	/// Queue or list is empty.
	#[error("empty")]
	Empty,
	/// Queue is full.
	#[error("full")]
	Full,
	/// No task is waiting.
	#[error("no waiting task")]
	NoTask,
	/// Resource is held by someone else and no wait was requested.
	#[error("resource busy")]
	Busy,
	/// The calling task does not own the mutex.
	#[error("not the owner")]
	NotOwner,
	/// The timer is not running.
	#[error("not active")]
	NotActive,
	/// The timer is already running.
	#[error("already active")]
	AlreadyActive,
	/// The task is not suspended.
	#[error("task not suspended")]
	NotSuspended,
	/// The semaphore count is already at its maximum.
	#[error("no semaphore to give")]
	NoSem,
	/// The mutex is not locked.
	#[error("mutex not locked")]
	NotLocked,
	/// A bounded kernel pool is exhausted.
	#[error("out of kernel memory")]
	NoMemory,
}

/// Shorthand for the result type used across the kernel.
pub type Result<T = ()> = core::result::Result<T, KernelError>;
