//! New-thread lifecycle.
//!
//! ```text
//! QUEUED -> RUNNING -> DONE -> JOINED
//!                         \--> DETACHED
//! ```
//!
//! The spawner reserves a descriptor, queues a [`NewThreadRequest`] on the
//! domain's pending FIFO and asks the supervisor for an OS thread. That
//! thread enters through [`run_pending`], claims the oldest request, runs the
//! body and then parks at DONE until a join or detach releases it. Join and
//! detach find the request through the generation-checked descriptor, so a
//! handle outliving its thread is rejected rather than reused.
//!
//! Early exit is a value: [`ThreadCtx::exit`] builds a [`ThreadExit`] that the
//! body returns as `Err`. Foreign callers that cannot return it (the C ABI's
//! `pthread_exit`) use [`ThreadExit::raise`], which unwinds to the same
//! cleanup point.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::domain::{Domain, ThreadCtx, fatal};
use crate::error::{ThreadError, ThreadResult};
use crate::pthread::tls;
use crate::spinlock::Spinlock;
use crate::td::TdId;
use crate::waitqueue::WaitQueue;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

pub const PTHREAD_CREATE_JOINABLE: i32 = 0;
pub const PTHREAD_CREATE_DETACHED: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ThreadState {
    Queued,
    Running,
    Done,
    Joined,
    Detached,
}

/// Early termination of a spawned thread, carrying its return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadExit {
    value: usize,
}

impl ThreadExit {
    pub(crate) const fn new(value: usize) -> Self {
        Self { value }
    }

    #[must_use]
    pub const fn value(&self) -> usize {
        self.value
    }

    /// Unwinds to the spawned thread's entry wrapper.
    pub fn raise(self) -> ! {
        resume_unwind(Box::new(self))
    }
}

pub type ThreadOutcome = Result<usize, ThreadExit>;

/// Entry point of a spawned thread: `(ctx, arg) -> outcome`.
pub type StartRoutine = fn(&ThreadCtx, usize) -> ThreadOutcome;

type Body = Box<dyn FnOnce(&ThreadCtx) -> ThreadOutcome + Send + 'static>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadAttr {
    detached: bool,
}

impl ThreadAttr {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_detach_state(&mut self, state: i32) -> ThreadResult<()> {
        self.detached = match state {
            PTHREAD_CREATE_JOINABLE => false,
            PTHREAD_CREATE_DETACHED => true,
            _ => return Err(ThreadError::InvalidArgument),
        };
        Ok(())
    }

    #[must_use]
    pub fn detached(&self) -> bool {
        self.detached
    }
}

/// Names a thread by its descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadHandle(TdId);

impl ThreadHandle {
    #[must_use]
    pub fn of(ctx: &ThreadCtx) -> Self {
        Self(ctx.id())
    }

    #[must_use]
    pub fn td(self) -> TdId {
        self.0
    }

    #[must_use]
    pub fn to_raw(self) -> u64 {
        self.0.to_raw()
    }

    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        TdId::from_raw(raw).map(Self)
    }
}

#[must_use]
pub fn equal(a: ThreadHandle, b: ThreadHandle) -> bool {
    a == b
}

// ---------------------------------------------------------------------------
// Request record
// ---------------------------------------------------------------------------

struct RequestState {
    state: ThreadState,
    detach_requested: bool,
    return_value: usize,
    waiters: WaitQueue<TdId>,
}

/// One spawned thread's rendezvous record.
pub struct NewThreadRequest {
    td: TdId,
    body: Spinlock<Option<Body>>,
    state: Spinlock<RequestState>,
}

impl NewThreadRequest {
    fn new(td: TdId, body: Body) -> Self {
        Self {
            td,
            body: Spinlock::new(Some(body)),
            state: Spinlock::new(RequestState {
                state: ThreadState::Queued,
                detach_requested: false,
                return_value: 0,
                waiters: WaitQueue::new(),
            }),
        }
    }

    fn current(&self) -> ThreadState {
        self.state.lock().state
    }

    /// Parks the caller while `blocked` holds, returning the state that ended it.
    fn wait_while(
        &self,
        ctx: &ThreadCtx,
        blocked: impl Fn(&RequestState) -> bool,
    ) -> ThreadResult<ThreadState> {
        let me = ctx.id();
        let mut st = self.state.lock();
        loop {
            if !blocked(&*st) {
                st.waiters.remove(ctx.links(), me);
                return Ok(st.state);
            }
            if !st.waiters.contains(ctx.links(), me) {
                st.waiters.push_back(ctx.links(), me);
            }
            st.unlock();
            if let Err(e) = ctx.domain().wait(me) {
                self.state.lock().waiters.remove(ctx.links(), me);
                return Err(e);
            }
            st = self.state.lock();
        }
    }

    /// Applies `update` and wakes everyone parked on this record.
    fn transition<R>(
        &self,
        ctx: &ThreadCtx,
        update: impl FnOnce(&mut RequestState) -> R,
    ) -> ThreadResult<R> {
        let mut st = self.state.lock();
        let from = st.state;
        let out = update(&mut *st);
        trace!("{}: {from:?} -> {:?}", self.td, st.state);
        let waiters = st.waiters.drain(ctx.links());
        st.unlock();
        ctx.domain().wake_all(waiters)?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Spawning
// ---------------------------------------------------------------------------

/// Starts `start(arg)` on a new thread. A missing routine is InvalidArgument.
pub fn spawn(
    ctx: &ThreadCtx,
    attr: &ThreadAttr,
    start: Option<StartRoutine>,
    arg: usize,
) -> ThreadResult<ThreadHandle> {
    let start = start.ok_or(ThreadError::InvalidArgument)?;
    spawn_with(ctx, attr, move |me| start(me, arg))
}

/// Starts `body` on a new thread.
pub fn spawn_with<F>(ctx: &ThreadCtx, attr: &ThreadAttr, body: F) -> ThreadResult<ThreadHandle>
where
    F: FnOnce(&ThreadCtx) -> ThreadOutcome + Send + 'static,
{
    let domain = ctx.domain();
    let td = domain.threads().reserve()?;
    let request = Arc::new(NewThreadRequest::new(td, Box::new(body)));
    domain.threads().bind_request(td, Arc::clone(&request));

    {
        let mut pending = domain.pending().lock();
        if pending.len() >= domain.config().max_pending_threads {
            pending.unlock();
            domain.threads().release(td);
            return Err(ThreadError::OutOfMemory);
        }
        pending.push_back(Arc::clone(&request));
    }

    let entry_domain = Arc::clone(domain);
    if let Err(e) = domain
        .supervisor()
        .create_os_thread(Box::new(move || run_pending(entry_domain)))
    {
        let withdrawn = {
            let mut pending = domain.pending().lock();
            match pending.iter().position(|r| Arc::ptr_eq(r, &request)) {
                Some(pos) => pending.remove(pos).is_some(),
                None => false,
            }
        };
        if withdrawn {
            domain.threads().release(td);
            debug!("thread creation for {td} refused: {e}");
            return Err(e.into());
        }
        // A worker already owns the request, so the thread exists after all.
        warn!("supervisor reported {e} but a worker claimed {td}");
    }
    debug!("created thread {td}");

    if let Err(e) = request.wait_while(ctx, |st| st.state == ThreadState::Queued) {
        warn!("start handshake with {td} failed: {e}");
    }

    let handle = ThreadHandle(td);
    if attr.detached && detach(ctx, handle).is_err() {
        fatal("detaching a freshly created thread failed");
    }
    Ok(handle)
}

/// Entry point of every supervisor-created worker thread.
pub(crate) fn run_pending(domain: Arc<Domain>) {
    let Some(request) = domain.pending().lock().pop_front() else {
        fatal("supervisor started a thread with no pending request");
    };
    let me = domain.attach(request.td);

    if request
        .transition(&me, |st| st.state = ThreadState::Running)
        .is_err()
    {
        fatal("could not signal thread start");
    }
    let Some(body) = request.body.lock().take() else {
        fatal("thread body already consumed");
    };

    let return_value = match catch_unwind(AssertUnwindSafe(|| body(me.ctx()))) {
        Ok(Ok(value)) => value,
        Ok(Err(exit)) => exit.value,
        Err(payload) => exit_value_of(payload),
    };

    tls::run_destructors(&domain, me.id());

    let finished = request.transition(&me, |st| {
        st.return_value = return_value;
        st.state = if st.detach_requested {
            ThreadState::Detached
        } else {
            ThreadState::Done
        };
        st.state
    });
    match finished {
        Ok(ThreadState::Done) => {
            if request
                .wait_while(&me, |st| st.state == ThreadState::Done)
                .is_err()
            {
                fatal("worker lost its supervisor while awaiting join");
            }
        }
        Ok(_) => {}
        Err(_) => fatal("could not signal thread completion"),
    }

    domain.threads().unbind_request(me.id());
    drop(me);
}

fn exit_value_of(payload: Box<dyn Any + Send>) -> usize {
    match payload.downcast::<ThreadExit>() {
        Ok(exit) => exit.value,
        Err(_) => fatal("thread start routine panicked"),
    }
}

// ---------------------------------------------------------------------------
// Join / detach
// ---------------------------------------------------------------------------

fn request_of(ctx: &ThreadCtx, handle: ThreadHandle) -> ThreadResult<Arc<NewThreadRequest>> {
    ctx.domain()
        .threads()
        .request(handle.0)
        .ok_or(ThreadError::InvalidArgument)
}

/// Waits for `handle` to finish and returns its value.
///
/// Joining a detached, already joined, freed or self handle is InvalidArgument.
pub fn join(ctx: &ThreadCtx, handle: ThreadHandle) -> ThreadResult<usize> {
    if handle.0 == ctx.id() {
        return Err(ThreadError::InvalidArgument);
    }
    let request = request_of(ctx, handle)?;
    {
        let st = request.state.lock();
        if st.detach_requested || matches!(st.state, ThreadState::Joined | ThreadState::Detached) {
            return Err(ThreadError::InvalidArgument);
        }
    }
    request.wait_while(ctx, |st| {
        matches!(st.state, ThreadState::Queued | ThreadState::Running)
    })?;
    let joined = request.transition(ctx, |st| {
        if st.state == ThreadState::Done {
            st.state = ThreadState::Joined;
            Some(st.return_value)
        } else {
            None
        }
    })?;
    match joined {
        Some(value) => {
            debug!("joined thread {}", handle.0);
            Ok(value)
        }
        None => Err(ThreadError::InvalidArgument),
    }
}

/// Lets `handle` release itself when it finishes.
pub fn detach(ctx: &ThreadCtx, handle: ThreadHandle) -> ThreadResult<()> {
    let request = request_of(ctx, handle)?;
    let accepted = request.transition(ctx, |st| match st.state {
        ThreadState::Joined | ThreadState::Detached => false,
        ThreadState::Done => {
            st.state = ThreadState::Detached;
            true
        }
        ThreadState::Queued | ThreadState::Running => {
            let first = !st.detach_requested;
            st.detach_requested = true;
            first
        }
    })?;
    if !accepted {
        return Err(ThreadError::InvalidArgument);
    }
    debug!("detached thread {}", handle.0);
    Ok(())
}

/// Lifecycle state of a spawned thread, or `None` once it is gone.
#[must_use]
pub fn state(ctx: &ThreadCtx, handle: ThreadHandle) -> Option<ThreadState> {
    request_of(ctx, handle).ok().map(|r| r.current())
}
