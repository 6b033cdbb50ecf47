//! Reader-writer lock.
//!
//! `writer.is_some()` implies `readers == 0`. Write locking never nests: the
//! writer asking again gets Busy instead of deadlocking on itself. Releases
//! wake every queued thread and let them race; no reader or writer
//! preference is kept.

use crate::domain::ThreadCtx;
use crate::error::{ThreadError, ThreadResult};
use crate::spinlock::Spinlock;
use crate::td::TdId;
use crate::waitqueue::WaitQueue;

#[derive(Debug)]
struct RwState {
    readers: usize,
    writer: Option<TdId>,
    queue: WaitQueue<TdId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

impl RwState {
    fn can_enter(&self, mode: Mode) -> bool {
        match mode {
            Mode::Read => self.writer.is_none(),
            Mode::Write => self.writer.is_none() && self.readers == 0,
        }
    }

    fn enter(&mut self, mode: Mode, me: TdId) -> ThreadResult<()> {
        match mode {
            Mode::Read => {
                self.readers = self.readers.checked_add(1).ok_or(ThreadError::Busy)?;
            }
            Mode::Write => self.writer = Some(me),
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct RwLock {
    state: Spinlock<RwState>,
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RwLock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Spinlock::new(RwState {
                readers: 0,
                writer: None,
                queue: WaitQueue::new(),
            }),
        }
    }

    pub fn read(&self, ctx: &ThreadCtx) -> ThreadResult<()> {
        self.acquire(ctx, Mode::Read)
    }

    pub fn write(&self, ctx: &ThreadCtx) -> ThreadResult<()> {
        self.acquire(ctx, Mode::Write)
    }

    pub fn try_read(&self, ctx: &ThreadCtx) -> ThreadResult<()> {
        self.try_acquire(ctx, Mode::Read)
    }

    pub fn try_write(&self, ctx: &ThreadCtx) -> ThreadResult<()> {
        self.try_acquire(ctx, Mode::Write)
    }

    fn try_acquire(&self, ctx: &ThreadCtx, mode: Mode) -> ThreadResult<()> {
        let mut st = self.state.lock();
        if st.writer == Some(ctx.id()) || !st.can_enter(mode) {
            return Err(ThreadError::Busy);
        }
        st.enter(mode, ctx.id())
    }

    fn acquire(&self, ctx: &ThreadCtx, mode: Mode) -> ThreadResult<()> {
        let me = ctx.id();
        let mut st = self.state.lock();
        // The writer would wait for itself in either mode.
        if st.writer == Some(me) {
            return Err(ThreadError::Busy);
        }
        loop {
            if st.can_enter(mode) {
                st.queue.remove(ctx.links(), me);
                return st.enter(mode, me);
            }
            if !st.queue.contains(ctx.links(), me) {
                st.queue.push_back(ctx.links(), me);
            }
            st.unlock();
            if let Err(e) = ctx.domain().wait(me) {
                self.state.lock().queue.remove(ctx.links(), me);
                return Err(e);
            }
            st = self.state.lock();
        }
    }

    /// Releases a write hold if the caller is the writer, else one read hold.
    pub fn unlock(&self, ctx: &ThreadCtx) -> ThreadResult<()> {
        let mut st = self.state.lock();
        match st.writer {
            Some(w) if w == ctx.id() => {
                if st.readers > 0 {
                    return Err(ThreadError::Busy);
                }
                st.writer = None;
            }
            Some(_) => return Err(ThreadError::NotOwner),
            None => {
                if st.readers == 0 {
                    return Err(ThreadError::NotOwner);
                }
                st.readers -= 1;
                if st.readers > 0 {
                    return Ok(());
                }
            }
        }
        let waiters = st.queue.drain(ctx.links());
        st.unlock();
        ctx.domain().wake_all(waiters)
    }

    /// Fails with Busy while held or waited on.
    pub fn destroy(&self) -> ThreadResult<()> {
        let st = self.state.lock();
        if st.readers > 0 || st.writer.is_some() || !st.queue.is_empty() {
            return Err(ThreadError::Busy);
        }
        Ok(())
    }

    #[must_use]
    pub fn readers(&self) -> usize {
        self.state.lock().readers
    }

    #[must_use]
    pub fn writer(&self) -> Option<TdId> {
        self.state.lock().writer
    }
}
