//! In-process supervisor.
//!
//! Stands in for the untrusted host in tests, benches and the harness. Each
//! [`HostThread`] gets a one-shot permit: `wake` sets it, `wait` consumes it,
//! so a wake that races ahead of its wait is not lost. Deadlines are honoured
//! on both clocks; monotonic deadlines are measured from [`monotonic_now`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::supervisor::{
    ClockKind, HostThread, Supervisor, SupervisorCall, SupervisorError, ThreadEntry, Timespec,
    WaitStatus,
};

/// Status returned for injected failures.
pub const INJECTED_FAILURE_STATUS: i32 = -11;

#[derive(Default)]
struct Permit {
    set: Mutex<bool>,
    cv: Condvar,
}

#[derive(Default)]
struct Counters {
    waits: AtomicU64,
    wakes: AtomicU64,
    wake_and_waits: AtomicU64,
    timed_waits: AtomicU64,
    timeouts: AtomicU64,
    threads_created: AtomicU64,
}

/// Round-trip counts observed by a [`HostSupervisor`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SupervisorStats {
    pub waits: u64,
    pub wakes: u64,
    pub wake_and_waits: u64,
    pub timed_waits: u64,
    pub timeouts: u64,
    pub threads_created: u64,
}

#[derive(Default)]
pub struct HostSupervisor {
    permits: Mutex<HashMap<HostThread, Arc<Permit>>>,
    fail_create: AtomicBool,
    failing_waits: AtomicU32,
    parked: AtomicUsize,
    counters: Counters,
}

fn process_epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Current monotonic time on the clock [`HostSupervisor`] uses for deadlines.
#[must_use]
pub fn monotonic_now() -> Timespec {
    Timespec::from_duration(process_epoch().elapsed())
}

/// Current realtime clock value.
#[must_use]
pub fn realtime_now() -> Timespec {
    Timespec::from_duration(SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default())
}

#[must_use]
pub fn now(clock: ClockKind) -> Timespec {
    match clock {
        ClockKind::Realtime => realtime_now(),
        ClockKind::Monotonic => monotonic_now(),
    }
}

impl HostSupervisor {
    #[must_use]
    pub fn new() -> Self {
        // Pin the monotonic epoch before any deadline is computed against it.
        let _ = process_epoch();
        Self::default()
    }

    /// Makes every subsequent `create_os_thread` fail until cleared.
    pub fn fail_thread_creation(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` blocking calls fail without blocking.
    pub fn fail_next_waits(&self, count: u32) {
        self.failing_waits.store(count, Ordering::SeqCst);
    }

    #[must_use]
    pub fn stats(&self) -> SupervisorStats {
        let c = &self.counters;
        SupervisorStats {
            waits: c.waits.load(Ordering::Relaxed),
            wakes: c.wakes.load(Ordering::Relaxed),
            wake_and_waits: c.wake_and_waits.load(Ordering::Relaxed),
            timed_waits: c.timed_waits.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            threads_created: c.threads_created.load(Ordering::Relaxed),
        }
    }

    /// Threads blocked inside a gate call right now.
    #[must_use]
    pub fn parked(&self) -> usize {
        self.parked.load(Ordering::SeqCst)
    }

    fn permit(&self, thread: HostThread) -> Arc<Permit> {
        Arc::clone(self.permits.lock().entry(thread).or_default())
    }

    fn injected_wait_failure(&self, call: SupervisorCall) -> Result<(), SupervisorError> {
        let taken = self
            .failing_waits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match taken {
            Ok(_) => Err(SupervisorError::new(call, INJECTED_FAILURE_STATUS)),
            Err(_) => Ok(()),
        }
    }

    fn post(&self, thread: HostThread) {
        let permit = self.permit(thread);
        let mut set = permit.set.lock();
        *set = true;
        permit.cv.notify_one();
    }

    fn block(&self, thread: HostThread) {
        let permit = self.permit(thread);
        let mut set = permit.set.lock();
        self.parked.fetch_add(1, Ordering::SeqCst);
        while !*set {
            permit.cv.wait(&mut set);
        }
        *set = false;
        self.parked.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Supervisor for HostSupervisor {
    fn wait(&self, me: HostThread) -> Result<(), SupervisorError> {
        self.counters.waits.fetch_add(1, Ordering::Relaxed);
        self.injected_wait_failure(SupervisorCall::Wait)?;
        self.block(me);
        Ok(())
    }

    fn wake(&self, target: HostThread) -> Result<(), SupervisorError> {
        self.counters.wakes.fetch_add(1, Ordering::Relaxed);
        self.post(target);
        Ok(())
    }

    fn wake_and_wait(&self, target: HostThread, me: HostThread) -> Result<(), SupervisorError> {
        self.counters.wake_and_waits.fetch_add(1, Ordering::Relaxed);
        self.injected_wait_failure(SupervisorCall::WakeAndWait)?;
        self.post(target);
        self.block(me);
        Ok(())
    }

    fn timed_wait(
        &self,
        me: HostThread,
        deadline: Timespec,
        clock: ClockKind,
    ) -> Result<WaitStatus, SupervisorError> {
        self.counters.timed_waits.fetch_add(1, Ordering::Relaxed);
        self.injected_wait_failure(SupervisorCall::TimedWait)?;
        let permit = self.permit(me);
        let mut set = permit.set.lock();
        self.parked.fetch_add(1, Ordering::SeqCst);
        let status = loop {
            if *set {
                *set = false;
                break WaitStatus::Woken;
            }
            let current = now(clock);
            if current >= deadline {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                break WaitStatus::TimedOut;
            }
            let remaining = deadline
                .as_duration()
                .saturating_sub(current.as_duration());
            permit.cv.wait_for(&mut set, remaining);
        };
        self.parked.fetch_sub(1, Ordering::SeqCst);
        Ok(status)
    }

    fn create_os_thread(&self, entry: ThreadEntry) -> Result<(), SupervisorError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(SupervisorError::new(
                SupervisorCall::CreateOsThread,
                INJECTED_FAILURE_STATUS,
            ));
        }
        std::thread::Builder::new()
            .name("enclave-worker".into())
            .spawn(entry)
            .map_err(|e| {
                SupervisorError::new(
                    SupervisorCall::CreateOsThread,
                    e.raw_os_error().unwrap_or(INJECTED_FAILURE_STATUS),
                )
            })?;
        self.counters.threads_created.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
