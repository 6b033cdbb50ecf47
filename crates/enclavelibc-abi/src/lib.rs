// Entry points accept raw pointers from C callers and validate them at
// runtime, so per-function safety docs would be redundant boilerplate.
#![allow(clippy::missing_safety_doc)]
//! # enclavelibc-abi
//!
//! `extern "C"` boundary over `enclavelibc-core`.
//!
//! Symbols carry an `enclavelibc_` prefix so the library can be linked next
//! to the host libc. Each call resolves the calling thread's descriptor in
//! the installed domain, looks up the primitive that backs the caller's
//! storage, and maps the core result onto an errno value.
//!
//! ```text
//! C caller -> ABI entry (this crate) -> runtime lookup -> core primitive -> errno
//! ```

#[macro_use]
mod macros;

pub mod pthread_abi;
pub mod runtime;
pub mod semaphore_abi;
