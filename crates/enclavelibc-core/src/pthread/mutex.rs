//! Recursive mutex.
//!
//! State is `{refs, owner, queue}` under one spinlock, with `refs > 0` exactly
//! when there is an owner. Release hands the lock to the queue front: the
//! next owner is chosen by unlock, not contended for.

use crate::domain::ThreadCtx;
use crate::error::{ThreadError, ThreadResult};
use crate::spinlock::Spinlock;
use crate::td::TdId;
use crate::waitqueue::WaitQueue;

#[derive(Debug)]
struct MutexState {
    refs: usize,
    owner: Option<TdId>,
    queue: WaitQueue<TdId>,
}

#[derive(Debug)]
pub struct Mutex {
    state: Spinlock<MutexState>,
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one acquisition attempt under the spinlock.
enum Attempt {
    Acquired,
    MustWait,
}

impl MutexState {
    fn try_acquire(&mut self, ctx: &ThreadCtx) -> ThreadResult<Attempt> {
        let me = ctx.id();
        if self.owner == Some(me) {
            self.refs = self.refs.checked_add(1).ok_or(ThreadError::Busy)?;
            return Ok(Attempt::Acquired);
        }
        if self.owner.is_none() {
            if self.queue.is_empty() {
                self.take(me);
                return Ok(Attempt::Acquired);
            }
            if self.queue.front() == Some(me) {
                self.queue.pop_front(ctx.links());
                self.take(me);
                return Ok(Attempt::Acquired);
            }
        }
        Ok(Attempt::MustWait)
    }

    fn take(&mut self, me: TdId) {
        self.owner = Some(me);
        self.refs = 1;
    }
}

impl Mutex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Spinlock::new(MutexState {
                refs: 0,
                owner: None,
                queue: WaitQueue::new(),
            }),
        }
    }

    /// Blocks until the caller owns the mutex. Re-locking by the owner nests.
    pub fn lock(&self, ctx: &ThreadCtx) -> ThreadResult<()> {
        let me = ctx.id();
        let mut st = self.state.lock();
        loop {
            if let Attempt::Acquired = st.try_acquire(ctx)? {
                return Ok(());
            }
            if !st.queue.contains(ctx.links(), me) {
                st.queue.push_back(ctx.links(), me);
            }
            st.unlock();
            if let Err(e) = ctx.domain().wait(me) {
                self.abandon_wait(ctx);
                return Err(e);
            }
            st = self.state.lock();
        }
    }

    /// Acquires only if that needs no waiting. Busy otherwise.
    pub fn try_lock(&self, ctx: &ThreadCtx) -> ThreadResult<()> {
        match self.state.lock().try_acquire(ctx)? {
            Attempt::Acquired => Ok(()),
            Attempt::MustWait => Err(ThreadError::Busy),
        }
    }

    pub fn unlock(&self, ctx: &ThreadCtx) -> ThreadResult<()> {
        if let Some(next) = self.release(ctx)? {
            ctx.domain().wake(next)?;
        }
        Ok(())
    }

    /// Drops one reference without waking anyone.
    ///
    /// Returns the waiter that must be woken when the lock became free.
    pub(crate) fn release(&self, ctx: &ThreadCtx) -> ThreadResult<Option<TdId>> {
        let mut st = self.state.lock();
        if st.owner != Some(ctx.id()) {
            return Err(ThreadError::NotOwner);
        }
        st.refs -= 1;
        if st.refs > 0 {
            return Ok(None);
        }
        st.owner = None;
        Ok(st.queue.front())
    }

    /// Fails with Busy while the mutex is owned or has waiters.
    pub fn destroy(&self) -> ThreadResult<()> {
        let st = self.state.lock();
        if st.owner.is_some() || !st.queue.is_empty() {
            return Err(ThreadError::Busy);
        }
        Ok(())
    }

    #[must_use]
    pub fn owner(&self) -> Option<TdId> {
        self.state.lock().owner
    }

    #[must_use]
    pub fn is_owned_by(&self, ctx: &ThreadCtx) -> bool {
        self.owner() == Some(ctx.id())
    }

    /// Leaves the queue after a failed gate call. If this waiter was the one
    /// an unlock handed off to, the hand-off moves on to the new front.
    fn abandon_wait(&self, ctx: &ThreadCtx) {
        let mut st = self.state.lock();
        let was_front = st.queue.front() == Some(ctx.id());
        st.queue.remove(ctx.links(), ctx.id());
        st.unlock();
        if was_front {
            self.resume_handoff(ctx);
        }
    }

    /// Wakes the queue front again if the mutex is still free.
    ///
    /// For callers whose hand-off wake may have been lost in a failed gate
    /// call. A second wake of a front that already got the first is spurious
    /// and harmless.
    pub(crate) fn resume_handoff(&self, ctx: &ThreadCtx) {
        let successor = {
            let st = self.state.lock();
            if st.owner.is_none() { st.queue.front() } else { None }
        };
        if let Some(next) = successor {
            if let Err(e) = ctx.domain().wake(next) {
                log::warn!("re-issued hand-off to {next} failed: {e}");
            }
        }
    }
}
