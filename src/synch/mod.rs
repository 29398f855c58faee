//! Synchronization primitives.
//!
//! All primitives keep their complete mutable state, wait queues included,
//! behind their own interrupt-masking spin-lock, and wake specific waiters
//! by direct hand-off rather than through a free count.

pub mod condvar;
pub mod msgqueue;
pub mod mutex;
pub mod semaphore;
pub mod spinlock;

pub use self::condvar::CondVar;
pub use self::msgqueue::MsgQueue;
pub use self::mutex::Mutex;
pub use self::semaphore::Semaphore;
