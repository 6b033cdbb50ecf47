//! ABI layer for `<pthread.h>` under the `enclavelibc_` prefix.
//!
//! Every entry point returns 0 or an errno value. Null pointers and storage
//! that was neither initialised by us nor left zeroed are `EINVAL`.

#![allow(clippy::missing_safety_doc)]

use std::ffi::{c_int, c_void};
use std::sync::Arc;

use log::debug;

use enclavelibc_core::pthread::{
    Cond, CondAttr, Destructor, Mutex, Once, RwLock, ThreadAttr, ThreadHandle, TsdKey, detach,
    equal, get_specific, join, key_create, key_delete, set_specific, spawn_with,
};
use enclavelibc_core::spinlock::Spinlock;
use enclavelibc_core::{ThreadResult, Timespec, fatal};

use crate::runtime::{self, Registry, clear, current};

/// C start routine. `C-unwind` so `enclavelibc_pthread_exit` can unwind
/// through it back to the worker's entry.
pub type StartRoutine = unsafe extern "C-unwind" fn(*mut c_void) -> *mut c_void;
pub type KeyDestructor = unsafe extern "C" fn(*mut c_void);
pub type OnceRoutine = unsafe extern "C-unwind" fn();

static MUTEXES: Registry<Mutex> = Registry::new();
static CONDS: Registry<Cond> = Registry::new();
static RWLOCKS: Registry<RwLock> = Registry::new();
static ONCES: Registry<Once> = Registry::new();
static SPINLOCKS: Registry<Spinlock<()>> = Registry::new();

fn status(result: ThreadResult<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => e.errno(),
    }
}

/// First `c_int` of an attribute object, where we keep its one setting.
fn attr_word<T>(attr: *const T) -> Option<*mut c_int> {
    if attr.is_null() || !(attr as usize).is_multiple_of(align_of::<c_int>()) {
        return None;
    }
    Some(attr.cast::<c_int>().cast_mut())
}

unsafe fn timespec_arg(abstime: *const libc::timespec) -> Result<Timespec, c_int> {
    if abstime.is_null() {
        return Err(libc::EINVAL);
    }
    // SAFETY: non-null, caller supplies a readable timespec.
    let ts = unsafe { &*abstime };
    Ok(Timespec::new(i64::from(ts.tv_sec), i64::from(ts.tv_nsec)))
}

// ===========================================================================
// Threads
// ===========================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_attr_init(attr: *mut libc::pthread_attr_t) -> c_int {
    if attr_word(attr).is_none() {
        return libc::EINVAL;
    }
    // SAFETY: checked non-null above.
    unsafe { clear(attr) };
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_attr_destroy(attr: *mut libc::pthread_attr_t) -> c_int {
    if attr_word(attr).is_none() { libc::EINVAL } else { 0 }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_attr_setdetachstate(
    attr: *mut libc::pthread_attr_t,
    state: c_int,
) -> c_int {
    let Some(word) = attr_word(attr) else {
        return libc::EINVAL;
    };
    try_errno!(ThreadAttr::new().set_detach_state(state).map_err(|e| e.errno()));
    // SAFETY: aligned and non-null per attr_word.
    unsafe { *word = state };
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_attr_getdetachstate(
    attr: *const libc::pthread_attr_t,
    state: *mut c_int,
) -> c_int {
    let Some(word) = attr_word(attr) else {
        return libc::EINVAL;
    };
    if state.is_null() {
        return libc::EINVAL;
    }
    // SAFETY: both pointers checked above.
    unsafe { *state = *word };
    0
}

unsafe fn thread_attr(attr: *const libc::pthread_attr_t) -> Result<ThreadAttr, c_int> {
    let mut parsed = ThreadAttr::new();
    if attr.is_null() {
        return Ok(parsed);
    }
    let word = attr_word(attr).ok_or(libc::EINVAL)?;
    // SAFETY: aligned and non-null per attr_word.
    parsed
        .set_detach_state(unsafe { *word })
        .map_err(|e| e.errno())?;
    Ok(parsed)
}

/// POSIX `pthread_create`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_create(
    thread_out: *mut libc::pthread_t,
    attr: *const libc::pthread_attr_t,
    start_routine: Option<StartRoutine>,
    arg: *mut c_void,
) -> c_int {
    if thread_out.is_null() {
        return libc::EINVAL;
    }
    let Some(start) = start_routine else {
        return libc::EINVAL;
    };
    // SAFETY: forwarded from the caller.
    let attr = try_errno!(unsafe { thread_attr(attr) });
    let ctx = try_errno!(current());
    let arg = arg as usize;
    let spawned = spawn_with(&ctx, &attr, move |me| {
        let _scope = runtime::enter_spawned(me);
        // SAFETY: the creator vouched for the routine and its argument.
        let value = unsafe { start(arg as *mut c_void) };
        Ok(value as usize)
    });
    match spawned {
        Ok(handle) => {
            // SAFETY: checked non-null above.
            unsafe { *thread_out = handle.to_raw() as libc::pthread_t };
            0
        }
        Err(e) => e.errno(),
    }
}

/// POSIX `pthread_join`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_join(
    thread: libc::pthread_t,
    retval: *mut *mut c_void,
) -> c_int {
    let Some(handle) = ThreadHandle::from_raw(thread as u64) else {
        return libc::EINVAL;
    };
    let ctx = try_errno!(current());
    match join(&ctx, handle) {
        Ok(value) => {
            if !retval.is_null() {
                // SAFETY: caller-provided output pointer.
                unsafe { *retval = value as *mut c_void };
            }
            0
        }
        Err(e) => e.errno(),
    }
}

/// POSIX `pthread_detach`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_detach(thread: libc::pthread_t) -> c_int {
    let Some(handle) = ThreadHandle::from_raw(thread as u64) else {
        return libc::EINVAL;
    };
    let ctx = try_errno!(current());
    status(detach(&ctx, handle))
}

/// POSIX `pthread_exit`. Only threads created through
/// `enclavelibc_pthread_create` may call this; anything else aborts.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn enclavelibc_pthread_exit(retval: *mut c_void) -> ! {
    let exit = match current() {
        Ok(ctx) => ctx.exit(retval as usize),
        Err(_) => fatal("pthread_exit called outside the domain"),
    };
    exit.raise()
}

/// POSIX `pthread_self`. Zero when no domain is installed.
#[unsafe(no_mangle)]
pub extern "C" fn enclavelibc_pthread_self() -> libc::pthread_t {
    match current() {
        Ok(ctx) => ThreadHandle::of(&ctx).to_raw() as libc::pthread_t,
        Err(_) => 0,
    }
}

/// POSIX `pthread_equal`.
#[unsafe(no_mangle)]
pub extern "C" fn enclavelibc_pthread_equal(a: libc::pthread_t, b: libc::pthread_t) -> c_int {
    match (
        ThreadHandle::from_raw(a as u64),
        ThreadHandle::from_raw(b as u64),
    ) {
        (Some(a), Some(b)) => c_int::from(equal(a, b)),
        _ => 0,
    }
}

// ===========================================================================
// Mutex operations
// ===========================================================================

/// Every mutex is recursive; `attr` is accepted and ignored.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_mutex_init(
    mutex: *mut libc::pthread_mutex_t,
    _attr: *const libc::pthread_mutexattr_t,
) -> c_int {
    if mutex.is_null() {
        return libc::EINVAL;
    }
    // SAFETY: checked non-null above.
    unsafe { clear(mutex) };
    MUTEXES.insert(mutex as usize, Mutex::new());
    0
}

unsafe fn mutex_arg(mutex: *mut libc::pthread_mutex_t) -> Result<Arc<Mutex>, c_int> {
    // SAFETY: forwarded from the caller.
    unsafe { MUTEXES.resolve(mutex.cast_const(), Mutex::new) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_mutex_destroy(mutex: *mut libc::pthread_mutex_t) -> c_int {
    // SAFETY: forwarded from the caller.
    let m = try_errno!(unsafe { mutex_arg(mutex) });
    try_errno!(m.destroy().map_err(|e| e.errno()));
    MUTEXES.remove(mutex as usize);
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_mutex_lock(mutex: *mut libc::pthread_mutex_t) -> c_int {
    // SAFETY: forwarded from the caller.
    let m = try_errno!(unsafe { mutex_arg(mutex) });
    let ctx = try_errno!(current());
    status(m.lock(&ctx))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_mutex_trylock(mutex: *mut libc::pthread_mutex_t) -> c_int {
    // SAFETY: forwarded from the caller.
    let m = try_errno!(unsafe { mutex_arg(mutex) });
    let ctx = try_errno!(current());
    status(m.try_lock(&ctx))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_mutex_unlock(mutex: *mut libc::pthread_mutex_t) -> c_int {
    // SAFETY: forwarded from the caller.
    let m = try_errno!(unsafe { mutex_arg(mutex) });
    let ctx = try_errno!(current());
    status(m.unlock(&ctx))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_mutexattr_init(
    attr: *mut libc::pthread_mutexattr_t,
) -> c_int {
    let Some(word) = attr_word(attr) else {
        return libc::EINVAL;
    };
    // SAFETY: checked non-null and aligned above.
    unsafe {
        clear(attr);
        *word = libc::PTHREAD_MUTEX_RECURSIVE;
    }
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_mutexattr_destroy(
    attr: *mut libc::pthread_mutexattr_t,
) -> c_int {
    if attr_word(attr).is_none() { libc::EINVAL } else { 0 }
}

/// Any standard type is accepted and recorded; the mutex built from it is
/// recursive regardless.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_mutexattr_settype(
    attr: *mut libc::pthread_mutexattr_t,
    kind: c_int,
) -> c_int {
    let Some(word) = attr_word(attr) else {
        return libc::EINVAL;
    };
    if !matches!(
        kind,
        libc::PTHREAD_MUTEX_NORMAL | libc::PTHREAD_MUTEX_RECURSIVE | libc::PTHREAD_MUTEX_ERRORCHECK
    ) {
        return libc::EINVAL;
    }
    // SAFETY: aligned and non-null per attr_word.
    unsafe { *word = kind };
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_mutexattr_gettype(
    attr: *const libc::pthread_mutexattr_t,
    kind: *mut c_int,
) -> c_int {
    let Some(word) = attr_word(attr) else {
        return libc::EINVAL;
    };
    if kind.is_null() {
        return libc::EINVAL;
    }
    // SAFETY: both pointers checked above.
    unsafe { *kind = *word };
    0
}

// ===========================================================================
// Spinlocks
// ===========================================================================

/// `pshared` is ignored: everything runs inside one domain.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_spin_init(
    lock: *mut libc::pthread_spinlock_t,
    _pshared: c_int,
) -> c_int {
    if lock.is_null() {
        return libc::EINVAL;
    }
    // SAFETY: checked non-null above.
    unsafe { clear(lock) };
    SPINLOCKS.insert(lock as usize, Spinlock::new(()));
    0
}

unsafe fn spin_arg(lock: *mut libc::pthread_spinlock_t) -> Result<Arc<Spinlock<()>>, c_int> {
    // SAFETY: forwarded from the caller.
    unsafe { SPINLOCKS.resolve(lock.cast_const(), || Spinlock::new(())) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_spin_destroy(lock: *mut libc::pthread_spinlock_t) -> c_int {
    // SAFETY: forwarded from the caller.
    let s = try_errno!(unsafe { spin_arg(lock) });
    if s.is_locked() {
        return libc::EBUSY;
    }
    SPINLOCKS.remove(lock as usize);
    0
}

/// Never calls the supervisor, so it works without an installed runtime.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_spin_lock(lock: *mut libc::pthread_spinlock_t) -> c_int {
    // SAFETY: forwarded from the caller.
    let s = try_errno!(unsafe { spin_arg(lock) });
    s.lock_detached();
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_spin_trylock(lock: *mut libc::pthread_spinlock_t) -> c_int {
    // SAFETY: forwarded from the caller.
    let s = try_errno!(unsafe { spin_arg(lock) });
    if s.try_lock_detached() { 0 } else { libc::EBUSY }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_spin_unlock(lock: *mut libc::pthread_spinlock_t) -> c_int {
    // SAFETY: forwarded from the caller.
    let s = try_errno!(unsafe { spin_arg(lock) });
    s.unlock_detached();
    0
}

// ===========================================================================
// Condition variables
// ===========================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_condattr_init(
    attr: *mut libc::pthread_condattr_t,
) -> c_int {
    if attr_word(attr).is_none() {
        return libc::EINVAL;
    }
    // SAFETY: checked non-null above.
    unsafe { clear(attr) };
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_condattr_destroy(
    attr: *mut libc::pthread_condattr_t,
) -> c_int {
    if attr_word(attr).is_none() { libc::EINVAL } else { 0 }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_condattr_setclock(
    attr: *mut libc::pthread_condattr_t,
    clock_id: libc::clockid_t,
) -> c_int {
    let Some(word) = attr_word(attr) else {
        return libc::EINVAL;
    };
    try_errno!(CondAttr::new().set_clock(clock_id).map_err(|e| e.errno()));
    // SAFETY: aligned and non-null per attr_word.
    unsafe { *word = clock_id };
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_condattr_getclock(
    attr: *const libc::pthread_condattr_t,
    clock_id: *mut libc::clockid_t,
) -> c_int {
    let Some(word) = attr_word(attr) else {
        return libc::EINVAL;
    };
    if clock_id.is_null() {
        return libc::EINVAL;
    }
    // SAFETY: both pointers checked above.
    unsafe { *clock_id = *word };
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_cond_init(
    cond: *mut libc::pthread_cond_t,
    attr: *const libc::pthread_condattr_t,
) -> c_int {
    if cond.is_null() {
        return libc::EINVAL;
    }
    let mut parsed = CondAttr::new();
    if !attr.is_null() {
        let Some(word) = attr_word(attr) else {
            return libc::EINVAL;
        };
        // SAFETY: aligned and non-null per attr_word.
        try_errno!(parsed.set_clock(unsafe { *word }).map_err(|e| e.errno()));
    }
    // SAFETY: checked non-null above.
    unsafe { clear(cond) };
    CONDS.insert(cond as usize, Cond::new(&parsed));
    0
}

unsafe fn cond_arg(cond: *mut libc::pthread_cond_t) -> Result<Arc<Cond>, c_int> {
    // SAFETY: forwarded from the caller.
    unsafe { CONDS.resolve(cond.cast_const(), Cond::default) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_cond_destroy(cond: *mut libc::pthread_cond_t) -> c_int {
    // SAFETY: forwarded from the caller.
    let c = try_errno!(unsafe { cond_arg(cond) });
    try_errno!(c.destroy().map_err(|e| e.errno()));
    CONDS.remove(cond as usize);
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_cond_wait(
    cond: *mut libc::pthread_cond_t,
    mutex: *mut libc::pthread_mutex_t,
) -> c_int {
    // SAFETY: forwarded from the caller.
    let (c, m) = unsafe { (try_errno!(cond_arg(cond)), try_errno!(mutex_arg(mutex))) };
    let ctx = try_errno!(current());
    status(c.wait(&ctx, &m))
}

/// `abstime` is measured on the clock chosen at init time.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_cond_timedwait(
    cond: *mut libc::pthread_cond_t,
    mutex: *mut libc::pthread_mutex_t,
    abstime: *const libc::timespec,
) -> c_int {
    // SAFETY: forwarded from the caller.
    let (c, m, deadline) = unsafe {
        (
            try_errno!(cond_arg(cond)),
            try_errno!(mutex_arg(mutex)),
            try_errno!(timespec_arg(abstime)),
        )
    };
    let ctx = try_errno!(current());
    status(c.timed_wait(&ctx, &m, deadline))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_cond_signal(cond: *mut libc::pthread_cond_t) -> c_int {
    // SAFETY: forwarded from the caller.
    let c = try_errno!(unsafe { cond_arg(cond) });
    let ctx = try_errno!(current());
    status(c.signal(&ctx))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_cond_broadcast(cond: *mut libc::pthread_cond_t) -> c_int {
    // SAFETY: forwarded from the caller.
    let c = try_errno!(unsafe { cond_arg(cond) });
    let ctx = try_errno!(current());
    status(c.broadcast(&ctx))
}

// ===========================================================================
// Reader-writer locks
// ===========================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_rwlock_init(
    rwlock: *mut libc::pthread_rwlock_t,
    _attr: *const libc::pthread_rwlockattr_t,
) -> c_int {
    if rwlock.is_null() {
        return libc::EINVAL;
    }
    // SAFETY: checked non-null above.
    unsafe { clear(rwlock) };
    RWLOCKS.insert(rwlock as usize, RwLock::new());
    0
}

unsafe fn rwlock_arg(rwlock: *mut libc::pthread_rwlock_t) -> Result<Arc<RwLock>, c_int> {
    // SAFETY: forwarded from the caller.
    unsafe { RWLOCKS.resolve(rwlock.cast_const(), RwLock::new) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_rwlock_destroy(
    rwlock: *mut libc::pthread_rwlock_t,
) -> c_int {
    // SAFETY: forwarded from the caller.
    let rw = try_errno!(unsafe { rwlock_arg(rwlock) });
    try_errno!(rw.destroy().map_err(|e| e.errno()));
    RWLOCKS.remove(rwlock as usize);
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_rwlock_rdlock(
    rwlock: *mut libc::pthread_rwlock_t,
) -> c_int {
    // SAFETY: forwarded from the caller.
    let rw = try_errno!(unsafe { rwlock_arg(rwlock) });
    let ctx = try_errno!(current());
    status(rw.read(&ctx))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_rwlock_wrlock(
    rwlock: *mut libc::pthread_rwlock_t,
) -> c_int {
    // SAFETY: forwarded from the caller.
    let rw = try_errno!(unsafe { rwlock_arg(rwlock) });
    let ctx = try_errno!(current());
    status(rw.write(&ctx))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_rwlock_tryrdlock(
    rwlock: *mut libc::pthread_rwlock_t,
) -> c_int {
    // SAFETY: forwarded from the caller.
    let rw = try_errno!(unsafe { rwlock_arg(rwlock) });
    let ctx = try_errno!(current());
    status(rw.try_read(&ctx))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_rwlock_trywrlock(
    rwlock: *mut libc::pthread_rwlock_t,
) -> c_int {
    // SAFETY: forwarded from the caller.
    let rw = try_errno!(unsafe { rwlock_arg(rwlock) });
    let ctx = try_errno!(current());
    status(rw.try_write(&ctx))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_rwlock_unlock(
    rwlock: *mut libc::pthread_rwlock_t,
) -> c_int {
    // SAFETY: forwarded from the caller.
    let rw = try_errno!(unsafe { rwlock_arg(rwlock) });
    let ctx = try_errno!(current());
    status(rw.unlock(&ctx))
}

// ===========================================================================
// Thread-specific data
// ===========================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_key_create(
    key: *mut libc::pthread_key_t,
    destructor: Option<KeyDestructor>,
) -> c_int {
    if key.is_null() {
        return libc::EINVAL;
    }
    let Some(domain) = runtime::installed() else {
        return libc::EAGAIN;
    };
    let destructor = destructor.map(|d| -> Destructor {
        // SAFETY: the key's creator vouched for the destructor.
        Arc::new(move |value: usize| unsafe { d(value as *mut c_void) })
    });
    match key_create(&domain, destructor) {
        Ok(created) => {
            debug!("abi key {} created", created.as_raw());
            // SAFETY: checked non-null above.
            unsafe { *key = created.as_raw() };
            0
        }
        Err(e) => e.errno(),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn enclavelibc_pthread_key_delete(key: libc::pthread_key_t) -> c_int {
    let Some(domain) = runtime::installed() else {
        return libc::EAGAIN;
    };
    status(key_delete(&domain, TsdKey::from_raw(key)))
}

/// Null for unset, deleted or out-of-range keys.
#[unsafe(no_mangle)]
pub extern "C" fn enclavelibc_pthread_getspecific(key: libc::pthread_key_t) -> *mut c_void {
    match current() {
        Ok(ctx) => get_specific(&ctx, TsdKey::from_raw(key)) as *mut c_void,
        Err(_) => std::ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn enclavelibc_pthread_setspecific(
    key: libc::pthread_key_t,
    value: *const c_void,
) -> c_int {
    let ctx = try_errno!(current());
    status(set_specific(&ctx, TsdKey::from_raw(key), value as usize))
}

// ===========================================================================
// One-time initialization
// ===========================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn enclavelibc_pthread_once(
    once: *mut libc::pthread_once_t,
    init_routine: Option<OnceRoutine>,
) -> c_int {
    let Some(init) = init_routine else {
        return libc::EINVAL;
    };
    if once.is_null() {
        return libc::EINVAL;
    }
    let control = ONCES.get_or_insert_with(once as usize, Once::new);
    let ctx = try_errno!(current());
    // SAFETY: the caller vouched for the routine.
    status(control.call_once(&ctx, || unsafe { init() }))
}
