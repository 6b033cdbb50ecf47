//! Process-wide domain, the calling thread's descriptor, and the address
//! registries that back C objects.
//!
//! C callers hand us opaque storage (`pthread_mutex_t`, `sem_t`, ...). The
//! primitive itself lives in a registry keyed by that storage's address.
//! All-zero storage that was never registered counts as statically
//! initialised and gets a fresh primitive on first use; anything else that
//! is unknown is rejected with `EINVAL`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_int;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use log::{debug, warn};

use enclavelibc_core::{Attached, Domain, DomainConfig, HostSupervisor, ThreadCtx};

// ---------------------------------------------------------------------------
// Installed domain
// ---------------------------------------------------------------------------

static DOMAIN: Mutex<Option<Arc<Domain>>> = Mutex::new(None);

fn lock_unpoisoned<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Makes `domain` the one every entry point runs against.
///
/// Fails with `EBUSY` if another domain is already installed.
pub fn install(domain: Arc<Domain>) -> Result<(), c_int> {
    let mut slot = lock_unpoisoned(&DOMAIN);
    if slot.is_some() {
        return Err(libc::EBUSY);
    }
    debug!(
        "installed domain with {} descriptors",
        domain.threads().capacity()
    );
    *slot = Some(domain);
    Ok(())
}

/// Detaches the installed domain. Threads still attached keep it alive
/// until they exit.
pub fn uninstall() -> Option<Arc<Domain>> {
    let taken = lock_unpoisoned(&DOMAIN).take();
    if taken.is_some() {
        debug!("uninstalled domain");
    }
    taken
}

#[must_use]
pub fn installed() -> Option<Arc<Domain>> {
    lock_unpoisoned(&DOMAIN).clone()
}

/// Installs a domain backed by the in-process supervisor, configured from
/// the environment. Returns 0, `EBUSY` when already installed, or the
/// errno of a rejected configuration.
#[unsafe(no_mangle)]
pub extern "C" fn enclavelibc_runtime_init() -> c_int {
    let domain = try_errno!(
        Domain::new(Arc::new(HostSupervisor::new()), DomainConfig::from_env())
            .map_err(|e| e.errno())
    );
    match install(domain) {
        Ok(()) => 0,
        Err(code) => code,
    }
}

/// Returns 0, or `EINVAL` when no domain was installed.
#[unsafe(no_mangle)]
pub extern "C" fn enclavelibc_runtime_shutdown() -> c_int {
    if uninstall().is_some() { 0 } else { libc::EINVAL }
}

// ---------------------------------------------------------------------------
// Current thread
// ---------------------------------------------------------------------------

enum Current {
    /// A foreign OS thread that entered the domain on its first call.
    Attached(Attached),
    /// A worker the domain spawned; the core owns its descriptor.
    Spawned(ThreadCtx),
}

impl Current {
    fn ctx(&self) -> &ThreadCtx {
        match self {
            Current::Attached(a) => a.ctx(),
            Current::Spawned(c) => c,
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Current>> = const { RefCell::new(None) };
}

/// The calling thread's context, entering the installed domain on first use.
///
/// `EAGAIN` without an installed domain, `ENOMEM` when the descriptor
/// arena is full, `EINVAL` while the thread is being torn down.
pub(crate) fn current() -> Result<ThreadCtx, c_int> {
    let domain = installed().ok_or(libc::EAGAIN)?;
    let (ctx, stale) = CURRENT
        .try_with(|slot| -> Result<(ThreadCtx, Option<Current>), c_int> {
            let mut slot = slot.borrow_mut();
            if let Some(cur) = slot.as_ref() {
                if Arc::ptr_eq(cur.ctx().domain(), &domain) {
                    return Ok((cur.ctx().clone(), None));
                }
            }
            let attached = domain.enter().map_err(|e| e.errno())?;
            let ctx = attached.ctx().clone();
            Ok((ctx, slot.replace(Current::Attached(attached))))
        })
        .unwrap_or(Err(libc::EINVAL))?;
    // Retiring may run TSD destructors that call back in.
    drop(stale);
    Ok(ctx)
}

/// Marks the calling worker as `ctx` until dropped.
pub(crate) struct SpawnedScope(());

pub(crate) fn enter_spawned(ctx: &ThreadCtx) -> SpawnedScope {
    let stale = CURRENT
        .try_with(|slot| slot.borrow_mut().replace(Current::Spawned(ctx.clone())))
        .ok()
        .flatten();
    drop(stale);
    SpawnedScope(())
}

impl Drop for SpawnedScope {
    fn drop(&mut self) {
        let left = CURRENT.try_with(|slot| slot.borrow_mut().take()).ok().flatten();
        drop(left);
    }
}

// ---------------------------------------------------------------------------
// Object registries
// ---------------------------------------------------------------------------

pub(crate) struct Registry<T> {
    objects: OnceLock<Mutex<HashMap<usize, Arc<T>>>>,
}

impl<T> Registry<T> {
    pub(crate) const fn new() -> Self {
        Self {
            objects: OnceLock::new(),
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<usize, Arc<T>>> {
        lock_unpoisoned(self.objects.get_or_init(|| Mutex::new(HashMap::new())))
    }

    pub(crate) fn insert(&self, addr: usize, object: T) {
        self.map().insert(addr, Arc::new(object));
    }

    pub(crate) fn get(&self, addr: usize) -> Option<Arc<T>> {
        self.map().get(&addr).cloned()
    }

    pub(crate) fn get_or_insert_with(&self, addr: usize, make: impl FnOnce() -> T) -> Arc<T> {
        Arc::clone(self.map().entry(addr).or_insert_with(|| Arc::new(make())))
    }

    pub(crate) fn remove(&self, addr: usize) -> Option<Arc<T>> {
        self.map().remove(&addr)
    }

    /// Looks up the object stored at `ptr`, creating it if the storage is
    /// still all zeroes.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must be valid for reads of `size_of::<S>()` bytes.
    pub(crate) unsafe fn resolve<S>(
        &self,
        ptr: *const S,
        make: impl FnOnce() -> T,
    ) -> Result<Arc<T>, c_int> {
        if ptr.is_null() {
            return Err(libc::EINVAL);
        }
        let addr = ptr as usize;
        if let Some(object) = self.get(addr) {
            return Ok(object);
        }
        // SAFETY: forwarded from the caller.
        if unsafe { is_zeroed(ptr) } {
            Ok(self.get_or_insert_with(addr, make))
        } else {
            warn!("rejecting uninitialised object at {addr:#x}");
            Err(libc::EINVAL)
        }
    }
}

/// # Safety
///
/// `ptr` must be valid for reads of `size_of::<S>()` bytes.
unsafe fn is_zeroed<S>(ptr: *const S) -> bool {
    // SAFETY: forwarded from the caller.
    let bytes = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), size_of::<S>()) };
    bytes.iter().all(|&b| b == 0)
}

/// Zeroes C object storage so a later lookup treats it as pristine.
///
/// # Safety
///
/// `ptr` must be non-null and valid for writes of one `S`.
pub(crate) unsafe fn clear<S>(ptr: *mut S) {
    // SAFETY: forwarded from the caller.
    unsafe { std::ptr::write_bytes(ptr, 0, 1) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_storage_resolves_and_dirty_storage_does_not() {
        let registry: Registry<u32> = Registry::new();
        let clean = [0u8; 16];
        let dirty = [0u8, 7, 0, 0];
        let a = unsafe { registry.resolve(&clean, || 5) }.expect("clean");
        let b = unsafe { registry.resolve(&clean, || 9) }.expect("again");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*b, 5);
        assert_eq!(unsafe { registry.resolve(&dirty, || 1) }.err(), Some(libc::EINVAL));
        assert_eq!(
            unsafe { registry.resolve(std::ptr::null::<u32>(), || 1) }.err(),
            Some(libc::EINVAL)
        );
    }

    #[test]
    fn registered_storage_resolves_regardless_of_contents() {
        let registry: Registry<&'static str> = Registry::new();
        let dirty = [1u8; 8];
        registry.insert(dirty.as_ptr() as usize, "mine");
        let found = unsafe { registry.resolve(dirty.as_ptr(), || "fresh") }.expect("known");
        assert_eq!(*found, "mine");
        assert!(registry.remove(dirty.as_ptr() as usize).is_some());
        assert!(registry.get(dirty.as_ptr() as usize).is_none());
    }
}
