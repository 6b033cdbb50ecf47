//! One-time initialization.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::domain::ThreadCtx;
use crate::error::ThreadResult;
use crate::pthread::mutex::Mutex;

/// Runs an initializer exactly once; late callers block until it has run.
#[derive(Debug, Default)]
pub struct Once {
    done: AtomicBool,
    lock: Mutex,
}

impl Once {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_once(&self, ctx: &ThreadCtx, init: impl FnOnce()) -> ThreadResult<()> {
        if self.done.load(Ordering::Acquire) {
            return Ok(());
        }
        self.lock.lock(ctx)?;
        if !self.done.load(Ordering::Acquire) {
            init();
            self.done.store(true, Ordering::Release);
        }
        self.lock.unlock(ctx)
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainConfig;
    use crate::domain::Domain;
    use crate::host::HostSupervisor;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn initializer_runs_once_across_threads() {
        let d = Domain::new(Arc::new(HostSupervisor::new()), DomainConfig::default())
            .expect("domain");
        let once = Arc::new(Once::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let threads: Vec<_> = (0..6)
            .map(|_| {
                let (d, once, runs) = (d.clone(), once.clone(), runs.clone());
                std::thread::spawn(move || {
                    let me = d.enter().expect("enter");
                    once.call_once(&me, || {
                        runs.fetch_add(1, Ordering::SeqCst);
                    })
                    .expect("once");
                    assert!(once.is_completed());
                })
            })
            .collect();
        for t in threads {
            t.join().expect("thread");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
