//! Condition variables.
//!
//! A waiter enlists itself and releases the caller's mutex in one spinlock
//! scope, so no signal can fall between the two. The mutex successor (if the
//! release freed it) is woken in the same round trip that parks the waiter.
//! A waiter counts as signalled once it is no longer in the queue; wait
//! always re-takes the mutex before returning, on every path.

use log::warn;

use crate::domain::ThreadCtx;
use crate::error::{ThreadError, ThreadResult};
use crate::pthread::mutex::Mutex;
use crate::spinlock::Spinlock;
use crate::supervisor::{ClockKind, Timespec, WaitStatus};
use crate::td::TdId;
use crate::waitqueue::WaitQueue;

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// Clock id for realtime timed waits (default).
pub const PTHREAD_COND_CLOCK_REALTIME: i32 = crate::supervisor::CLOCK_REALTIME_ID;
/// Clock id for monotonic timed waits.
pub const PTHREAD_COND_CLOCK_MONOTONIC: i32 = crate::supervisor::CLOCK_MONOTONIC_ID;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CondAttr {
    clock: ClockKind,
}

impl CondAttr {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the realtime and monotonic clock ids are accepted.
    pub fn set_clock(&mut self, clock_id: i32) -> ThreadResult<()> {
        self.clock = ClockKind::from_clock_id(clock_id).ok_or(ThreadError::InvalidArgument)?;
        Ok(())
    }

    #[must_use]
    pub fn clock(&self) -> ClockKind {
        self.clock
    }
}

// ---------------------------------------------------------------------------
// Condition variable
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Cond {
    queue: Spinlock<WaitQueue<TdId>>,
    clock: ClockKind,
}

impl Default for Cond {
    fn default() -> Self {
        Self::new(&CondAttr::default())
    }
}

impl Cond {
    #[must_use]
    pub fn new(attr: &CondAttr) -> Self {
        Self {
            queue: Spinlock::new(WaitQueue::new()),
            clock: attr.clock,
        }
    }

    #[must_use]
    pub fn clock(&self) -> ClockKind {
        self.clock
    }

    /// Releases `mutex`, waits for a signal, and re-acquires `mutex`.
    pub fn wait(&self, ctx: &ThreadCtx, mutex: &Mutex) -> ThreadResult<()> {
        self.wait_until(ctx, mutex, None)
    }

    /// As [`Self::wait`], but gives up at the absolute `deadline` on this
    /// variable's clock with TimedOut (the mutex is still re-acquired).
    pub fn timed_wait(&self, ctx: &ThreadCtx, mutex: &Mutex, deadline: Timespec) -> ThreadResult<()> {
        if !deadline.is_valid() {
            return Err(ThreadError::InvalidArgument);
        }
        self.wait_until(ctx, mutex, Some(deadline))
    }

    fn wait_until(
        &self,
        ctx: &ThreadCtx,
        mutex: &Mutex,
        deadline: Option<Timespec>,
    ) -> ThreadResult<()> {
        let me = ctx.id();
        let domain = ctx.domain();
        let mut q = self.queue.lock();
        q.push_back(ctx.links(), me);
        let mut notify = match mutex.release(ctx) {
            Ok(next) => next,
            Err(e) => {
                q.remove(ctx.links(), me);
                return Err(e);
            }
        };

        let mut handoff_lost = false;
        let outcome = loop {
            q.unlock();
            let handoff = notify.take();
            let gate = match (deadline, handoff) {
                (None, Some(next)) => domain.wake_and_wait(next, me).map(|()| WaitStatus::Woken),
                (None, None) => domain.wait(me).map(|()| WaitStatus::Woken),
                (Some(at), next) => match next.map_or(Ok(()), |n| domain.wake(n)) {
                    Ok(()) => domain.timed_wait(me, at, self.clock),
                    Err(e) => Err(e),
                },
            };
            q = self.queue.lock();
            match gate {
                Ok(WaitStatus::Woken) => {
                    if !q.contains(ctx.links(), me) {
                        break Ok(());
                    }
                }
                Ok(WaitStatus::TimedOut) => {
                    if q.remove(ctx.links(), me) {
                        break Err(ThreadError::TimedOut);
                    }
                    warn!("{me}: timeout reported after a signal dequeued it, treating as woken");
                    break Ok(());
                }
                Err(e) => {
                    q.remove(ctx.links(), me);
                    // The gate may have failed before the mutex successor was woken.
                    handoff_lost = handoff.is_some();
                    break Err(e);
                }
            }
        };
        q.unlock();
        if handoff_lost {
            mutex.resume_handoff(ctx);
        }

        let relock = mutex.lock(ctx);
        outcome.and(relock)
    }

    /// Wakes the longest waiter, if any.
    pub fn signal(&self, ctx: &ThreadCtx) -> ThreadResult<()> {
        let waiter = self.queue.lock().pop_front(ctx.links());
        match waiter {
            Some(w) => ctx.domain().wake(w),
            None => Ok(()),
        }
    }

    /// Wakes every waiter queued at the time of the call.
    pub fn broadcast(&self, ctx: &ThreadCtx) -> ThreadResult<()> {
        let waiters = self.queue.lock().drain(ctx.links());
        ctx.domain().wake_all(waiters)
    }

    pub fn destroy(&self) -> ThreadResult<()> {
        if self.queue.lock().is_empty() {
            Ok(())
        } else {
            Err(ThreadError::Busy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainConfig;
    use crate::domain::Domain;
    use crate::host::{self, HostSupervisor};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn domain() -> (Arc<HostSupervisor>, Arc<Domain>) {
        let sup = Arc::new(HostSupervisor::new());
        let d = Domain::new(sup.clone(), DomainConfig::default()).expect("domain");
        (sup, d)
    }

    #[test]
    fn attr_rejects_unknown_clock() {
        let mut attr = CondAttr::new();
        assert_eq!(attr.set_clock(7), Err(ThreadError::InvalidArgument));
        attr.set_clock(PTHREAD_COND_CLOCK_MONOTONIC).expect("monotonic");
        assert_eq!(Cond::new(&attr).clock(), ClockKind::Monotonic);
    }

    #[test]
    fn wait_without_owning_mutex_is_rejected_and_leaves_no_waiter() {
        let (_, d) = domain();
        let x = d.enter().expect("x");
        let (c, m) = (Cond::default(), Mutex::new());
        assert_eq!(c.wait(&x, &m), Err(ThreadError::NotOwner));
        assert_eq!(c.destroy(), Ok(()));
    }

    #[test]
    fn timed_wait_times_out_holding_the_mutex() {
        let (_, d) = domain();
        let x = d.enter().expect("x");
        let (c, m) = (Cond::default(), Mutex::new());
        m.lock(&x).expect("lock");
        let deadline = host::now(c.clock()).saturating_add(Duration::from_millis(20));
        assert_eq!(c.timed_wait(&x, &m, deadline), Err(ThreadError::TimedOut));
        assert!(m.is_owned_by(&x));
        assert_eq!(c.destroy(), Ok(()));
        m.unlock(&x).expect("unlock");
    }

    #[test]
    fn malformed_deadline_is_rejected_before_waiting() {
        let (_, d) = domain();
        let x = d.enter().expect("x");
        let (c, m) = (Cond::default(), Mutex::new());
        m.lock(&x).expect("lock");
        assert_eq!(
            c.timed_wait(&x, &m, Timespec::new(0, -1)),
            Err(ThreadError::InvalidArgument)
        );
        assert!(m.is_owned_by(&x));
    }

    #[test]
    fn timed_wait_signalled_before_deadline_returns_holding_the_mutex() {
        let (sup, d) = domain();
        let c = Arc::new(Cond::default());
        let m = Arc::new(Mutex::new());
        let waiter = {
            let (d, c, m) = (d.clone(), c.clone(), m.clone());
            std::thread::spawn(move || {
                let me = d.enter().expect("enter");
                m.lock(&me).expect("lock");
                let deadline = host::now(c.clock()).saturating_add(Duration::from_secs(10));
                c.timed_wait(&me, &m, deadline).expect("signalled in time");
                assert!(m.is_owned_by(&me));
                m.unlock(&me).expect("unlock");
            })
        };
        while sup.parked() == 0 {
            std::thread::yield_now();
        }
        let main = d.enter().expect("main");
        m.lock(&main).expect("lock");
        c.signal(&main).expect("signal");
        m.unlock(&main).expect("unlock");
        waiter.join().expect("waiter");
        assert_eq!(sup.stats().timeouts, 0);
        assert_eq!(c.destroy(), Ok(()));
        assert_eq!(m.destroy(), Ok(()));
    }

    #[test]
    fn failed_gate_call_re_acquires_mutex_and_leaves_no_waiter() {
        let (sup, d) = domain();
        let x = d.enter().expect("x");
        let (c, m) = (Cond::default(), Mutex::new());
        m.lock(&x).expect("lock");
        sup.fail_next_waits(1);
        let err = c.wait(&x, &m).expect_err("gate failure surfaces");
        assert!(matches!(err, ThreadError::Supervisor(_)));
        assert!(m.is_owned_by(&x));
        assert_eq!(c.destroy(), Ok(()));
        m.unlock(&x).expect("unlock");
    }

    #[test]
    fn failed_gate_call_still_hands_the_mutex_to_its_next_waiter() {
        let (sup, d) = domain();
        let x = d.enter().expect("x");
        let c = Cond::default();
        let m = Arc::new(Mutex::new());
        m.lock(&x).expect("lock");
        let acquired = Arc::new(AtomicBool::new(false));
        let y = {
            let (d, m, acquired) = (d.clone(), m.clone(), acquired.clone());
            std::thread::spawn(move || {
                let me = d.enter().expect("enter");
                m.lock(&me).expect("lock");
                acquired.store(true, Ordering::SeqCst);
                m.unlock(&me).expect("unlock");
            })
        };
        // y is queued on the mutex and blocked in the supervisor.
        while sup.parked() == 0 {
            std::thread::yield_now();
        }
        sup.fail_next_waits(1);
        let err = c.wait(&x, &m).expect_err("gate failure surfaces");
        assert!(matches!(err, ThreadError::Supervisor(_)));
        assert!(m.is_owned_by(&x));
        y.join().expect("y");
        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(c.destroy(), Ok(()));
        m.unlock(&x).expect("unlock");
        assert_eq!(m.destroy(), Ok(()));
    }

    #[test]
    fn signal_on_empty_queue_is_a_no_op() {
        let (sup, d) = domain();
        let x = d.enter().expect("x");
        let c = Cond::default();
        c.signal(&x).expect("signal");
        c.broadcast(&x).expect("broadcast");
        assert_eq!(sup.stats().wakes, 0);
    }

    #[test]
    fn broadcast_releases_every_waiter() {
        let (_, d) = domain();
        let c = Arc::new(Cond::default());
        let m = Arc::new(Mutex::new());
        let ready = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let (d, c, m, ready) = (d.clone(), c.clone(), m.clone(), ready.clone());
                std::thread::spawn(move || {
                    let me = d.enter().expect("enter");
                    m.lock(&me).expect("lock");
                    ready.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    c.wait(&me, &m).expect("wait");
                    assert!(m.is_owned_by(&me));
                    m.unlock(&me).expect("unlock");
                })
            })
            .collect();
        let main = d.enter().expect("main");
        // Once the count is in and the mutex is free, all three are parked.
        loop {
            m.lock(&main).expect("lock");
            let parked = ready.load(std::sync::atomic::Ordering::SeqCst) == 3;
            if parked {
                c.broadcast(&main).expect("broadcast");
                m.unlock(&main).expect("unlock");
                break;
            }
            m.unlock(&main).expect("unlock");
            std::thread::yield_now();
        }
        for w in waiters {
            w.join().expect("waiter");
        }
        assert_eq!(c.destroy(), Ok(()));
    }
}
