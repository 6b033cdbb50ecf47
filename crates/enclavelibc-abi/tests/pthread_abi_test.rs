#![cfg(target_os = "linux")]

use std::ffi::c_void;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use enclavelibc_abi::pthread_abi::*;
use enclavelibc_abi::runtime::enclavelibc_runtime_init;
use enclavelibc_abi::semaphore_abi::*;

fn runtime() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let rc = enclavelibc_runtime_init();
        assert!(rc == 0 || rc == libc::EBUSY, "runtime init failed: {rc}");
    });
}

fn zeroed<T>() -> Box<T> {
    // SAFETY: the pthread and semaphore storage types are plain bytes.
    Box::new(unsafe { std::mem::zeroed() })
}

fn errno() -> i32 {
    // SAFETY: reads the calling thread's errno slot.
    unsafe { *libc::__errno_location() }
}

#[test]
fn static_initializer_mutex_is_recursive_and_owned() {
    runtime();
    let mut m = zeroed::<libc::pthread_mutex_t>();
    let mp: *mut libc::pthread_mutex_t = &mut *m;
    let addr = mp as usize;

    unsafe {
        assert_eq!(enclavelibc_pthread_mutex_lock(mp), 0);
        assert_eq!(enclavelibc_pthread_mutex_lock(mp), 0);
    }
    let other = std::thread::spawn(move || unsafe {
        let mp = addr as *mut libc::pthread_mutex_t;
        (
            enclavelibc_pthread_mutex_trylock(mp),
            enclavelibc_pthread_mutex_unlock(mp),
        )
    })
    .join()
    .expect("other thread");
    assert_eq!(other, (libc::EBUSY, libc::EPERM));

    unsafe {
        assert_eq!(enclavelibc_pthread_mutex_destroy(mp), libc::EBUSY);
        assert_eq!(enclavelibc_pthread_mutex_unlock(mp), 0);
        assert_eq!(enclavelibc_pthread_mutex_unlock(mp), 0);
        assert_eq!(enclavelibc_pthread_mutex_destroy(mp), 0);
    }
}

#[test]
fn garbage_storage_and_null_are_rejected() {
    runtime();
    let mut m = zeroed::<libc::pthread_mutex_t>();
    let mp: *mut libc::pthread_mutex_t = &mut *m;
    unsafe {
        mp.cast::<u8>().add(3).write(0x5a);
        assert_eq!(enclavelibc_pthread_mutex_lock(mp), libc::EINVAL);
        assert_eq!(enclavelibc_pthread_mutex_init(mp, std::ptr::null()), 0);
        assert_eq!(enclavelibc_pthread_mutex_lock(mp), 0);
        assert_eq!(enclavelibc_pthread_mutex_unlock(mp), 0);
        assert_eq!(enclavelibc_pthread_mutex_destroy(mp), 0);
        assert_eq!(
            enclavelibc_pthread_mutex_lock(std::ptr::null_mut()),
            libc::EINVAL
        );
        assert_eq!(
            enclavelibc_pthread_cond_signal(std::ptr::null_mut()),
            libc::EINVAL
        );
    }
}

unsafe extern "C-unwind" fn double_it(arg: *mut c_void) -> *mut c_void {
    (arg as usize * 2) as *mut c_void
}

unsafe extern "C-unwind" fn exit_early(arg: *mut c_void) -> *mut c_void {
    unsafe { enclavelibc_pthread_exit((arg as usize + 1) as *mut c_void) }
}

#[test]
fn create_join_returns_value_once() {
    runtime();
    let mut t: libc::pthread_t = 0;
    let mut out: *mut c_void = std::ptr::null_mut();
    unsafe {
        assert_eq!(
            enclavelibc_pthread_create(&mut t, std::ptr::null(), Some(double_it), 21 as *mut c_void),
            0
        );
        assert_eq!(enclavelibc_pthread_join(t, &mut out), 0);
        assert_eq!(out as usize, 42);
        assert_eq!(enclavelibc_pthread_join(t, &mut out), libc::EINVAL);
    }
}

#[test]
fn pthread_exit_value_reaches_joiner() {
    runtime();
    let mut t: libc::pthread_t = 0;
    let mut out: *mut c_void = std::ptr::null_mut();
    unsafe {
        assert_eq!(
            enclavelibc_pthread_create(&mut t, std::ptr::null(), Some(exit_early), 9 as *mut c_void),
            0
        );
        assert_eq!(enclavelibc_pthread_join(t, &mut out), 0);
    }
    assert_eq!(out as usize, 10);
}

#[test]
fn create_rejects_missing_routine_and_bad_attr() {
    runtime();
    let mut t: libc::pthread_t = 0;
    let mut attr = zeroed::<libc::pthread_attr_t>();
    let ap: *mut libc::pthread_attr_t = &mut *attr;
    let mut state = -1;
    unsafe {
        assert_eq!(
            enclavelibc_pthread_create(&mut t, std::ptr::null(), None, std::ptr::null_mut()),
            libc::EINVAL
        );
        assert_eq!(enclavelibc_pthread_attr_init(ap), 0);
        assert_eq!(enclavelibc_pthread_attr_setdetachstate(ap, 7), libc::EINVAL);
        assert_eq!(enclavelibc_pthread_attr_getdetachstate(ap, &mut state), 0);
        assert_eq!(state, libc::PTHREAD_CREATE_JOINABLE);
        assert_eq!(enclavelibc_pthread_attr_destroy(ap), 0);
    }
}

#[test]
fn detached_attr_makes_thread_unjoinable() {
    runtime();
    let mut t: libc::pthread_t = 0;
    let mut attr = zeroed::<libc::pthread_attr_t>();
    let ap: *mut libc::pthread_attr_t = &mut *attr;
    unsafe {
        assert_eq!(enclavelibc_pthread_attr_init(ap), 0);
        assert_eq!(
            enclavelibc_pthread_attr_setdetachstate(ap, libc::PTHREAD_CREATE_DETACHED),
            0
        );
        assert_eq!(
            enclavelibc_pthread_create(&mut t, ap, Some(double_it), 1 as *mut c_void),
            0
        );
        assert_eq!(
            enclavelibc_pthread_join(t, std::ptr::null_mut()),
            libc::EINVAL
        );
        assert_eq!(enclavelibc_pthread_detach(t), libc::EINVAL);
    }
}

#[test]
fn self_and_equal_use_descriptor_identity() {
    runtime();
    let me = enclavelibc_pthread_self();
    assert_ne!(me, 0);
    assert_eq!(enclavelibc_pthread_equal(me, enclavelibc_pthread_self()), 1);
    let other = std::thread::spawn(|| enclavelibc_pthread_self())
        .join()
        .expect("other");
    assert_eq!(enclavelibc_pthread_equal(me, other), 0);
}

static DESTRUCTED: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn record_destructor(value: *mut c_void) {
    DESTRUCTED.store(value as usize, Ordering::SeqCst);
}

unsafe extern "C-unwind" fn set_key(arg: *mut c_void) -> *mut c_void {
    let key = arg as usize as libc::pthread_key_t;
    unsafe {
        assert_eq!(enclavelibc_pthread_setspecific(key, 0x77 as *const c_void), 0);
    }
    enclavelibc_pthread_getspecific(key)
}

#[test]
fn key_values_are_per_thread_and_destructed_at_exit() {
    runtime();
    let mut key: libc::pthread_key_t = 0;
    let mut t: libc::pthread_t = 0;
    let mut out: *mut c_void = std::ptr::null_mut();
    unsafe {
        assert_eq!(
            enclavelibc_pthread_key_create(&mut key, Some(record_destructor)),
            0
        );
        assert!(enclavelibc_pthread_getspecific(key).is_null());
        assert_eq!(
            enclavelibc_pthread_create(&mut t, std::ptr::null(), Some(set_key), key as usize as *mut c_void),
            0
        );
        assert_eq!(enclavelibc_pthread_join(t, &mut out), 0);
    }
    assert_eq!(out as usize, 0x77);
    assert_eq!(DESTRUCTED.load(Ordering::SeqCst), 0x77);
    assert!(enclavelibc_pthread_getspecific(key).is_null());
    assert_eq!(enclavelibc_pthread_key_delete(key), 0);
}

#[test]
fn cond_timedwait_expires_holding_the_mutex() {
    runtime();
    let mut c = zeroed::<libc::pthread_cond_t>();
    let mut m = zeroed::<libc::pthread_mutex_t>();
    let mut attr = zeroed::<libc::pthread_condattr_t>();
    let cp: *mut libc::pthread_cond_t = &mut *c;
    let mp: *mut libc::pthread_mutex_t = &mut *m;
    let ap: *mut libc::pthread_condattr_t = &mut *attr;
    let mut clock: libc::clockid_t = -1;
    unsafe {
        assert_eq!(enclavelibc_pthread_condattr_init(ap), 0);
        assert_eq!(enclavelibc_pthread_condattr_setclock(ap, 42), libc::EINVAL);
        assert_eq!(
            enclavelibc_pthread_condattr_setclock(ap, libc::CLOCK_MONOTONIC),
            0
        );
        assert_eq!(enclavelibc_pthread_condattr_getclock(ap, &mut clock), 0);
        assert_eq!(clock, libc::CLOCK_MONOTONIC);
        assert_eq!(enclavelibc_pthread_cond_init(cp, ap), 0);

        assert_eq!(enclavelibc_pthread_cond_wait(cp, mp), libc::EPERM);
        assert_eq!(enclavelibc_pthread_mutex_lock(mp), 0);
        // A deadline in the past on the monotonic clock.
        let deadline = libc::timespec {
            tv_sec: 0,
            tv_nsec: 1,
        };
        assert_eq!(
            enclavelibc_pthread_cond_timedwait(cp, mp, &deadline),
            libc::ETIMEDOUT
        );
        // Still ours after the timeout.
        assert_eq!(enclavelibc_pthread_mutex_unlock(mp), 0);
        assert_eq!(enclavelibc_pthread_cond_destroy(cp), 0);
        assert_eq!(enclavelibc_pthread_mutex_destroy(mp), 0);
    }
}

#[test]
fn rwlock_try_variants_report_busy() {
    runtime();
    let mut rw = zeroed::<libc::pthread_rwlock_t>();
    let rp: *mut libc::pthread_rwlock_t = &mut *rw;
    let addr = rp as usize;
    unsafe {
        assert_eq!(enclavelibc_pthread_rwlock_rdlock(rp), 0);
        assert_eq!(enclavelibc_pthread_rwlock_trywrlock(rp), libc::EBUSY);
    }
    let (try_read, try_write) = std::thread::spawn(move || unsafe {
        let rp = addr as *mut libc::pthread_rwlock_t;
        let r = enclavelibc_pthread_rwlock_tryrdlock(rp);
        if r == 0 {
            enclavelibc_pthread_rwlock_unlock(rp);
        }
        (r, enclavelibc_pthread_rwlock_trywrlock(rp))
    })
    .join()
    .expect("other");
    assert_eq!((try_read, try_write), (0, libc::EBUSY));
    unsafe {
        assert_eq!(enclavelibc_pthread_rwlock_destroy(rp), libc::EBUSY);
        assert_eq!(enclavelibc_pthread_rwlock_unlock(rp), 0);
        assert_eq!(enclavelibc_pthread_rwlock_unlock(rp), libc::EPERM);
        assert_eq!(enclavelibc_pthread_rwlock_destroy(rp), 0);
    }
}

static ONCE_RUNS: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C-unwind" fn bump_once() {
    ONCE_RUNS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn once_runs_its_routine_a_single_time() {
    runtime();
    let once = Box::new(0 as libc::pthread_once_t);
    let addr = Box::into_raw(once) as usize;
    let threads: Vec<_> = (0..4)
        .map(|_| {
            std::thread::spawn(move || unsafe {
                enclavelibc_pthread_once(addr as *mut libc::pthread_once_t, Some(bump_once))
            })
        })
        .collect();
    for t in threads {
        assert_eq!(t.join().expect("thread"), 0);
    }
    assert_eq!(ONCE_RUNS.load(Ordering::SeqCst), 1);
    // SAFETY: allocated above with Box::into_raw.
    drop(unsafe { Box::from_raw(addr as *mut libc::pthread_once_t) });
}

#[test]
fn semaphore_reports_failures_through_errno() {
    runtime();
    let mut s = zeroed::<libc::sem_t>();
    let sp: *mut libc::sem_t = &mut *s;
    let addr = sp as usize;
    let mut value = -1;
    unsafe {
        assert_eq!(enclavelibc_sem_wait(sp), -1);
        assert_eq!(errno(), libc::EINVAL);
        assert_eq!(enclavelibc_sem_init(sp, 1, 0), -1);
        assert_eq!(errno(), libc::ENOSYS);
        assert_eq!(enclavelibc_sem_init(sp, 0, 0), 0);
        assert_eq!(enclavelibc_sem_trywait(sp), -1);
        assert_eq!(errno(), libc::EAGAIN);
    }

    let waiter = std::thread::spawn(move || unsafe {
        enclavelibc_sem_wait(addr as *mut libc::sem_t)
    });
    std::thread::sleep(Duration::from_millis(20));
    unsafe {
        assert_eq!(enclavelibc_sem_post(sp), 0);
    }
    assert_eq!(waiter.join().expect("waiter"), 0);

    unsafe {
        assert_eq!(enclavelibc_sem_getvalue(sp, &mut value), 0);
        assert_eq!(value, 0);
        assert_eq!(enclavelibc_sem_post(sp), 0);
        assert_eq!(enclavelibc_sem_getvalue(sp, &mut value), 0);
        assert_eq!(value, 1);
        assert_eq!(enclavelibc_sem_destroy(sp), 0);
        assert_eq!(enclavelibc_sem_destroy(sp), -1);
        assert_eq!(errno(), libc::EINVAL);
    }
}

#[test]
fn spinlock_excludes_across_threads() {
    let mut s = zeroed::<libc::pthread_spinlock_t>();
    let sp: *mut libc::pthread_spinlock_t = &mut *s;
    let addr = sp as usize;
    unsafe {
        assert_eq!(enclavelibc_pthread_spin_init(sp, 0), 0);
        assert_eq!(enclavelibc_pthread_spin_lock(sp), 0);
        assert_eq!(enclavelibc_pthread_spin_trylock(sp), libc::EBUSY);
        assert_eq!(enclavelibc_pthread_spin_destroy(sp), libc::EBUSY);
        assert_eq!(enclavelibc_pthread_spin_unlock(sp), 0);
    }

    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let workers: Vec<_> = (0..4)
        .map(|_| {
            std::thread::spawn(move || unsafe {
                let sp = addr as *mut libc::pthread_spinlock_t;
                for _ in 0..1000 {
                    assert_eq!(enclavelibc_pthread_spin_lock(sp), 0);
                    let v = COUNTER.load(Ordering::Relaxed);
                    COUNTER.store(v + 1, Ordering::Relaxed);
                    assert_eq!(enclavelibc_pthread_spin_unlock(sp), 0);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().expect("worker");
    }
    assert_eq!(COUNTER.load(Ordering::Relaxed), 4000);
    unsafe {
        assert_eq!(enclavelibc_pthread_spin_destroy(sp), 0);
        assert_eq!(enclavelibc_pthread_spin_lock(std::ptr::null_mut()), libc::EINVAL);
    }
}

#[test]
fn mutexattr_records_type_and_builds_a_recursive_mutex() {
    runtime();
    let mut attr = zeroed::<libc::pthread_mutexattr_t>();
    let ap: *mut libc::pthread_mutexattr_t = &mut *attr;
    let mut m = zeroed::<libc::pthread_mutex_t>();
    let mp: *mut libc::pthread_mutex_t = &mut *m;
    let mut kind = -1;
    unsafe {
        assert_eq!(enclavelibc_pthread_mutexattr_init(ap), 0);
        assert_eq!(enclavelibc_pthread_mutexattr_gettype(ap, &mut kind), 0);
        assert_eq!(kind, libc::PTHREAD_MUTEX_RECURSIVE);
        assert_eq!(enclavelibc_pthread_mutexattr_settype(ap, 42), libc::EINVAL);
        assert_eq!(
            enclavelibc_pthread_mutexattr_settype(ap, libc::PTHREAD_MUTEX_ERRORCHECK),
            0
        );
        assert_eq!(enclavelibc_pthread_mutexattr_gettype(ap, &mut kind), 0);
        assert_eq!(kind, libc::PTHREAD_MUTEX_ERRORCHECK);

        assert_eq!(enclavelibc_pthread_mutex_init(mp, ap), 0);
        assert_eq!(enclavelibc_pthread_mutex_lock(mp), 0);
        assert_eq!(enclavelibc_pthread_mutex_lock(mp), 0);
        assert_eq!(enclavelibc_pthread_mutex_unlock(mp), 0);
        assert_eq!(enclavelibc_pthread_mutex_unlock(mp), 0);
        assert_eq!(enclavelibc_pthread_mutex_destroy(mp), 0);
        assert_eq!(enclavelibc_pthread_mutexattr_destroy(ap), 0);
        assert_eq!(
            enclavelibc_pthread_mutexattr_init(std::ptr::null_mut()),
            libc::EINVAL
        );
    }
}
