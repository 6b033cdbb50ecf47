//! # enclavelibc-core
//!
//! Thread primitives for code running inside a trusted execution domain.
//!
//! The domain cannot block on OS primitives, create OS threads, or receive
//! signals by itself. Every suspension goes through a [`Supervisor`] call gate
//! to the untrusted host, and everything the host reports back is re-checked
//! against in-domain state before it is acted on.
//!
//! Built here, leaf first:
//! - [`td`]: the thread descriptor arena and its intrusive queue links
//! - [`waitqueue`]: the FIFO every blocking primitive parks threads on
//! - [`spinlock`]: the only primitive that never calls the supervisor
//! - [`pthread`]: mutex, condition variable, rwlock, semaphore, TSD keys and
//!   the new-thread lifecycle
//!
//! No `unsafe` code is permitted outside the spinlock.

#![deny(unsafe_code)]

pub mod config;
pub mod domain;
pub mod errno;
pub mod error;
pub mod host;
pub mod pthread;
#[allow(unsafe_code)]
pub mod spinlock;
pub mod supervisor;
pub mod td;
pub mod waitqueue;

pub use config::DomainConfig;
pub use domain::{Attached, Domain, ThreadCtx, fatal};
pub use error::{ThreadError, ThreadResult};
pub use host::HostSupervisor;
pub use supervisor::{
    ClockKind, HostThread, Supervisor, SupervisorCall, SupervisorError, ThreadEntry, Timespec,
    WaitStatus,
};
pub use td::TdId;
