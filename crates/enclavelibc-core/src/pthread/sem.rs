//! Semaphores.
//!
//! [`Semaphore`] is only the wait queue: the token lives in a signed counter
//! the caller owns, where [`SEM_WAITING`] means "no token, waiters may be
//! queued". [`CountingSemaphore`] pairs one with such a counter and gives the
//! usual post / wait / try-wait protocol.

use core::sync::atomic::{AtomicI32, Ordering};

use log::warn;

use crate::domain::ThreadCtx;
use crate::error::{ThreadError, ThreadResult};
use crate::spinlock::Spinlock;
use crate::supervisor::{ClockKind, Timespec, WaitStatus};
use crate::td::TdId;
use crate::waitqueue::WaitQueue;

/// Counter value meaning no token is available and waiters may be parked.
pub const SEM_WAITING: i32 = -1;
pub const SEM_VALUE_MAX: i32 = i32::MAX;

#[derive(Debug)]
pub struct Semaphore {
    queue: Spinlock<WaitQueue<TdId>>,
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl Semaphore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Spinlock::new(WaitQueue::new()),
        }
    }

    /// Parks the caller while `value` reads [`SEM_WAITING`].
    ///
    /// Returns as soon as the token may have been released; the caller
    /// re-reads its counter and retries. With a deadline the wait ends early
    /// with TimedOut.
    pub fn wait(
        &self,
        ctx: &ThreadCtx,
        value: &AtomicI32,
        deadline: Option<(Timespec, ClockKind)>,
    ) -> ThreadResult<()> {
        let me = ctx.id();
        let mut q = self.queue.lock();
        if value.load(Ordering::Acquire) != SEM_WAITING {
            return Ok(());
        }
        q.push_back(ctx.links(), me);
        loop {
            q.unlock();
            let gate = match deadline {
                None => ctx.domain().wait(me).map(|()| WaitStatus::Woken),
                Some((at, clock)) => ctx.domain().timed_wait(me, at, clock),
            };
            q = self.queue.lock();
            match gate {
                Ok(WaitStatus::Woken) => {
                    if !q.contains(ctx.links(), me) {
                        return Ok(());
                    }
                }
                Ok(WaitStatus::TimedOut) => {
                    if q.remove(ctx.links(), me) {
                        return Err(ThreadError::TimedOut);
                    }
                    warn!("{me}: semaphore timeout reported after wake, treating as woken");
                    return Ok(());
                }
                Err(e) => {
                    q.remove(ctx.links(), me);
                    return Err(e);
                }
            }
        }
    }

    /// Wakes the longest waiter. False when nobody was queued.
    pub fn wake(&self, ctx: &ThreadCtx) -> ThreadResult<bool> {
        let waiter = self.queue.lock().pop_front(ctx.links());
        match waiter {
            Some(w) => ctx.domain().wake(w).map(|()| true),
            None => Ok(false),
        }
    }

    #[must_use]
    pub fn has_waiters(&self) -> bool {
        !self.queue.lock().is_empty()
    }
}

/// A counting semaphore over [`Semaphore`].
#[derive(Debug)]
pub struct CountingSemaphore {
    value: AtomicI32,
    waiters: Semaphore,
}

impl CountingSemaphore {
    pub fn new(initial: u32) -> ThreadResult<Self> {
        let initial = i32::try_from(initial).map_err(|_| ThreadError::InvalidArgument)?;
        Ok(Self {
            value: AtomicI32::new(initial),
            waiters: Semaphore::new(),
        })
    }

    /// Tokens currently available. Zero while threads wait.
    #[must_use]
    pub fn value(&self) -> i32 {
        self.value.load(Ordering::Acquire).max(0)
    }

    pub fn try_wait(&self) -> ThreadResult<()> {
        let mut v = self.value.load(Ordering::Acquire);
        while v > 0 {
            match self
                .value
                .compare_exchange_weak(v, v - 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(cur) => v = cur,
            }
        }
        Err(ThreadError::Busy)
    }

    pub fn wait(&self, ctx: &ThreadCtx) -> ThreadResult<()> {
        self.wait_inner(ctx, None)
    }

    pub fn timed_wait(&self, ctx: &ThreadCtx, deadline: Timespec, clock: ClockKind) -> ThreadResult<()> {
        if !deadline.is_valid() {
            return Err(ThreadError::InvalidArgument);
        }
        self.wait_inner(ctx, Some((deadline, clock)))
    }

    fn wait_inner(&self, ctx: &ThreadCtx, deadline: Option<(Timespec, ClockKind)>) -> ThreadResult<()> {
        loop {
            if self.try_wait().is_ok() {
                return Ok(());
            }
            // Announce the wait; a racing post turns the sentinel back into a token.
            let _ = self.value.compare_exchange(
                0,
                SEM_WAITING,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            if self.value.load(Ordering::Acquire) > 0 {
                continue;
            }
            self.waiters.wait(ctx, &self.value, deadline)?;
        }
    }

    pub fn post(&self, ctx: &ThreadCtx) -> ThreadResult<()> {
        let mut v = self.value.load(Ordering::Acquire);
        loop {
            let next = if v == SEM_WAITING {
                1
            } else {
                v.checked_add(1).ok_or(ThreadError::InvalidArgument)?
            };
            match self
                .value
                .compare_exchange_weak(v, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(cur) => v = cur,
            }
        }
        self.waiters.wake(ctx).map(|_| ())
    }

    /// Fails with Busy while threads are parked.
    pub fn destroy(&self) -> ThreadResult<()> {
        if self.waiters.has_waiters() {
            Err(ThreadError::Busy)
        } else {
            Ok(())
        }
    }
}
