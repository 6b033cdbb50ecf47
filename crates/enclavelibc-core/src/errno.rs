//! Error numbers surfaced to the compatibility shim.
//!
//! Linux x86_64 values. Only the codes this crate can produce are listed.

/// Operation not permitted (unlock by a thread that does not own the lock).
pub const EPERM: i32 = 1;
/// Resource temporarily unavailable (supervisor refused cooperation).
pub const EAGAIN: i32 = 11;
/// Out of memory (descriptor, key, or pending-request table exhausted).
pub const ENOMEM: i32 = 12;
/// Device or resource busy.
pub const EBUSY: i32 = 16;
/// Invalid argument.
pub const EINVAL: i32 = 22;
/// Connection timed out (deadline elapsed).
pub const ETIMEDOUT: i32 = 110;
