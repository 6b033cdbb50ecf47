//! ABI layer for `<semaphore.h>` under the `enclavelibc_` prefix.
//!
//! Follows the POSIX convention for this header: 0 on success, otherwise
//! -1 with `errno` set.

#![allow(clippy::missing_safety_doc)]

use std::ffi::{c_int, c_uint};
use std::sync::Arc;

use enclavelibc_core::pthread::CountingSemaphore;
use enclavelibc_core::{ClockKind, ThreadError, ThreadResult, Timespec};

use crate::runtime::{Registry, clear, current};

static SEMAPHORES: Registry<CountingSemaphore> = Registry::new();

fn set_abi_errno(val: c_int) {
    // SAFETY: __errno_location always returns the calling thread's errno slot.
    unsafe { *libc::__errno_location() = val };
}

fn fail(code: c_int) -> c_int {
    set_abi_errno(code);
    -1
}

fn status(result: ThreadResult<()>) -> c_int {
    match result {
        Ok(()) => 0,
        // A missing token is EAGAIN here, not EBUSY.
        Err(ThreadError::Busy) => fail(libc::EAGAIN),
        Err(e) => fail(e.errno()),
    }
}

/// Semaphores have no static initializer; only storage passed to
/// `enclavelibc_sem_init` is known.
fn sem_arg(sem: *mut libc::sem_t) -> Result<Arc<CountingSemaphore>, c_int> {
    if sem.is_null() {
        return Err(libc::EINVAL);
    }
    SEMAPHORES.get(sem as usize).ok_or(libc::EINVAL)
}

/// POSIX `sem_init`. Process-shared semaphores are not supported.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_sem_init(
    sem: *mut libc::sem_t,
    pshared: c_int,
    value: c_uint,
) -> c_int {
    if sem.is_null() {
        return fail(libc::EINVAL);
    }
    if pshared != 0 {
        return fail(libc::ENOSYS);
    }
    let created = match CountingSemaphore::new(value) {
        Ok(s) => s,
        Err(e) => return fail(e.errno()),
    };
    // SAFETY: checked non-null above.
    unsafe { clear(sem) };
    SEMAPHORES.insert(sem as usize, created);
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_sem_destroy(sem: *mut libc::sem_t) -> c_int {
    let s = match sem_arg(sem) {
        Ok(s) => s,
        Err(code) => return fail(code),
    };
    if let Err(e) = s.destroy() {
        return fail(e.errno());
    }
    SEMAPHORES.remove(sem as usize);
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_sem_wait(sem: *mut libc::sem_t) -> c_int {
    let (s, ctx) = match (sem_arg(sem), current()) {
        (Ok(s), Ok(ctx)) => (s, ctx),
        (Err(code), _) | (_, Err(code)) => return fail(code),
    };
    status(s.wait(&ctx))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_sem_trywait(sem: *mut libc::sem_t) -> c_int {
    match sem_arg(sem) {
        Ok(s) => status(s.try_wait()),
        Err(code) => fail(code),
    }
}

/// `abstime` is on `CLOCK_REALTIME`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_sem_timedwait(
    sem: *mut libc::sem_t,
    abstime: *const libc::timespec,
) -> c_int {
    if abstime.is_null() {
        return fail(libc::EINVAL);
    }
    // SAFETY: non-null, caller supplies a readable timespec.
    let ts = unsafe { &*abstime };
    let deadline = Timespec::new(i64::from(ts.tv_sec), i64::from(ts.tv_nsec));
    let (s, ctx) = match (sem_arg(sem), current()) {
        (Ok(s), Ok(ctx)) => (s, ctx),
        (Err(code), _) | (_, Err(code)) => return fail(code),
    };
    status(s.timed_wait(&ctx, deadline, ClockKind::Realtime))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_sem_post(sem: *mut libc::sem_t) -> c_int {
    let (s, ctx) = match (sem_arg(sem), current()) {
        (Ok(s), Ok(ctx)) => (s, ctx),
        (Err(code), _) | (_, Err(code)) => return fail(code),
    };
    status(s.post(&ctx))
}

/// Reports zero, never a negative count, while threads are waiting.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_sem_getvalue(sem: *mut libc::sem_t, sval: *mut c_int) -> c_int {
    if sval.is_null() {
        return fail(libc::EINVAL);
    }
    match sem_arg(sem) {
        Ok(s) => {
            // SAFETY: checked non-null above.
            unsafe { *sval = s.value() };
            0
        }
        Err(code) => fail(code),
    }
}
