//! POSIX-style threads over the supervisor gate.
//!
//! Mutexes, condition variables, reader-writer locks, semaphores,
//! thread-specific data, one-time initialization and the new-thread
//! lifecycle. Every primitive keeps its bookkeeping under its own
//! [`crate::spinlock::Spinlock`] and parks threads on a
//! [`crate::waitqueue::WaitQueue`].

pub mod cond;
pub mod mutex;
pub mod once;
pub mod rwlock;
pub mod sem;
pub mod thread;
pub mod tls;

pub use cond::{Cond, CondAttr};
pub use mutex::Mutex;
pub use once::Once;
pub use rwlock::RwLock;
pub use sem::{CountingSemaphore, SEM_VALUE_MAX, SEM_WAITING, Semaphore};
pub use thread::{
    StartRoutine, ThreadAttr, ThreadExit, ThreadHandle, ThreadOutcome, ThreadState, detach, equal,
    join, spawn, spawn_with,
};
pub use tls::{Destructor, TsdKey, get_specific, key_create, key_delete, set_specific};
