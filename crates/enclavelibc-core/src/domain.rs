//! The trusted domain: explicit owner of all process-wide thread state.
//!
//! A [`Domain`] is built once at startup with the supervisor it must use and
//! torn down with its last [`Arc`]. It owns the descriptor arena, the
//! thread-specific-data key table and the pending new-thread FIFO; nothing
//! here is a free-standing global.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;

use log::{error, trace};

use crate::config::DomainConfig;
use crate::error::ThreadResult;
use crate::pthread::thread::{NewThreadRequest, ThreadExit};
use crate::pthread::tls::KeyTable;
use crate::spinlock::Spinlock;
use crate::supervisor::{ClockKind, Supervisor, Timespec, WaitStatus};
use crate::td::{TdId, ThreadTable};

/// Logs and aborts. Used for corrupted internal state that must not be
/// propagated as an ordinary error.
#[cold]
pub fn fatal(msg: &str) -> ! {
    error!("enclavelibc fatal: {msg}");
    std::process::abort()
}

pub struct Domain {
    supervisor: Arc<dyn Supervisor>,
    config: DomainConfig,
    threads: ThreadTable,
    keys: KeyTable,
    pending: Spinlock<VecDeque<Arc<NewThreadRequest>>>,
}

impl std::fmt::Debug for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Domain")
            .field("config", &self.config)
            .field("live_threads", &self.threads.live_count())
            .finish_non_exhaustive()
    }
}

impl Domain {
    pub fn new(supervisor: Arc<dyn Supervisor>, config: DomainConfig) -> ThreadResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            supervisor,
            threads: ThreadTable::new(config.max_threads, config.tsd_keys),
            keys: KeyTable::new(config.tsd_reserved, config.tsd_keys),
            pending: Spinlock::new(VecDeque::with_capacity(config.max_pending_threads)),
            config,
        }))
    }

    /// Binds a fresh descriptor to the calling OS thread.
    pub fn enter(self: &Arc<Self>) -> ThreadResult<Attached> {
        let id = self.threads.reserve()?;
        trace!("{id} entered the domain");
        Ok(self.attach(id))
    }

    pub(crate) fn attach(self: &Arc<Self>, id: TdId) -> Attached {
        Attached {
            ctx: ThreadCtx {
                domain: Arc::clone(self),
                id,
            },
        }
    }

    #[must_use]
    pub fn config(&self) -> &DomainConfig {
        &self.config
    }

    #[must_use]
    pub fn threads(&self) -> &ThreadTable {
        &self.threads
    }

    pub(crate) fn keys(&self) -> &KeyTable {
        &self.keys
    }

    pub(crate) fn pending(&self) -> &Spinlock<VecDeque<Arc<NewThreadRequest>>> {
        &self.pending
    }

    pub(crate) fn supervisor(&self) -> &dyn Supervisor {
        self.supervisor.as_ref()
    }

    // -----------------------------------------------------------------------
    // Gate calls
    // -----------------------------------------------------------------------

    pub(crate) fn wait(&self, me: TdId) -> ThreadResult<()> {
        trace!("{me} wait");
        self.supervisor.wait(me.host())?;
        Ok(())
    }

    pub(crate) fn wake(&self, target: TdId) -> ThreadResult<()> {
        trace!("wake {target}");
        self.supervisor.wake(target.host())?;
        Ok(())
    }

    pub(crate) fn wake_and_wait(&self, target: TdId, me: TdId) -> ThreadResult<()> {
        trace!("{me} wake {target} and wait");
        self.supervisor.wake_and_wait(target.host(), me.host())?;
        Ok(())
    }

    pub(crate) fn timed_wait(
        &self,
        me: TdId,
        deadline: Timespec,
        clock: ClockKind,
    ) -> ThreadResult<WaitStatus> {
        trace!("{me} timed wait until {}.{:09} ({clock:?})", deadline.sec, deadline.nsec);
        Ok(self.supervisor.timed_wait(me.host(), deadline, clock)?)
    }

    /// Wakes every id, reporting the first failure after trying them all.
    pub(crate) fn wake_all(&self, targets: Vec<TdId>) -> ThreadResult<()> {
        let mut first_err = None;
        for target in targets {
            if let Err(e) = self.wake(target) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn retire(&self, id: TdId) {
        crate::pthread::tls::run_destructors(self, id);
        self.threads.release(id);
        trace!("{id} left the domain");
    }
}

/// The calling thread as seen by the primitives.
#[derive(Clone)]
pub struct ThreadCtx {
    domain: Arc<Domain>,
    id: TdId,
}

impl std::fmt::Debug for ThreadCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ThreadCtx").field(&self.id).finish()
    }
}

impl ThreadCtx {
    #[must_use]
    pub fn id(&self) -> TdId {
        self.id
    }

    #[must_use]
    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    /// Ends the current spawned thread with `value`.
    ///
    /// Return the result as `Err` from the start routine (usually through
    /// `?`). Calling this from a thread the domain did not spawn aborts.
    pub fn exit(&self, value: usize) -> ThreadExit {
        if self.domain.threads.request(self.id).is_none() {
            fatal("thread exit called outside a domain-spawned thread");
        }
        ThreadExit::new(value)
    }

    pub(crate) fn links(&self) -> &ThreadTable {
        &self.domain.threads
    }
}

/// A descriptor bound to an OS thread for as long as this guard lives.
///
/// Dropping it runs thread-specific-data destructors and then frees the
/// descriptor.
pub struct Attached {
    ctx: ThreadCtx,
}

impl Attached {
    #[must_use]
    pub fn ctx(&self) -> &ThreadCtx {
        &self.ctx
    }
}

impl Deref for Attached {
    type Target = ThreadCtx;

    fn deref(&self) -> &ThreadCtx {
        &self.ctx
    }
}

impl Drop for Attached {
    fn drop(&mut self) {
        self.ctx.domain.retire(self.ctx.id);
    }
}

impl std::fmt::Debug for Attached {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Attached").field(&self.ctx.id).finish()
    }
}
