//! Thread-specific data keys.
//!
//! Keys index words of each thread's TSD page. The low `reserved` words alias
//! descriptor header fields and are never handed out. The key table is one
//! spinlocked slot array owned by the [`Domain`]; values live in the
//! descriptor arena, so get and set never take the table lock.
//!
//! At thread exit every non-null value of an in-use key is passed to that
//! key's destructor exactly once. Values are cleared and destructors collected
//! under the table lock; the destructors run after it is released.

use std::sync::Arc;

use log::debug;

use crate::domain::{Domain, ThreadCtx};
use crate::error::{ThreadError, ThreadResult};
use crate::spinlock::Spinlock;
use crate::td::TdId;

/// Called with the thread's value for a key when that thread exits.
pub type Destructor = Arc<dyn Fn(usize) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TsdKey(u32);

impl TsdKey {
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Default, Clone)]
struct KeySlot {
    used: bool,
    destructor: Option<Destructor>,
}

pub(crate) struct KeyTable {
    reserved: usize,
    slots: Spinlock<Vec<KeySlot>>,
}

impl KeyTable {
    pub(crate) fn new(reserved: usize, keys: usize) -> Self {
        Self {
            reserved,
            slots: Spinlock::new(vec![KeySlot::default(); keys]),
        }
    }

    fn check(&self, key: TsdKey) -> ThreadResult<usize> {
        let i = key.index();
        if i < self.reserved || i >= self.slots.lock().len() {
            return Err(ThreadError::InvalidArgument);
        }
        Ok(i)
    }
}

pub fn key_create(domain: &Domain, destructor: Option<Destructor>) -> ThreadResult<TsdKey> {
    let table = domain.keys();
    let mut slots = table.slots.lock();
    let reserved = table.reserved;
    let (index, slot) = slots
        .iter_mut()
        .enumerate()
        .skip(reserved)
        .find(|(_, s)| !s.used)
        .ok_or(ThreadError::OutOfMemory)?;
    slot.used = true;
    slot.destructor = destructor;
    let key = TsdKey(u32::try_from(index).map_err(|_| ThreadError::OutOfMemory)?);
    drop(slots);
    debug!("created tsd key {}", key.0);
    Ok(key)
}

/// Retires `key`. Values already stored under it stay where they are.
pub fn key_delete(domain: &Domain, key: TsdKey) -> ThreadResult<()> {
    let table = domain.keys();
    let i = table.check(key)?;
    let mut slots = table.slots.lock();
    slots[i].used = false;
    slots[i].destructor = None;
    drop(slots);
    debug!("deleted tsd key {}", key.0);
    Ok(())
}

/// The caller's value for `key`; zero when unset or out of range.
#[must_use]
pub fn get_specific(ctx: &ThreadCtx, key: TsdKey) -> usize {
    match ctx.domain().keys().check(key) {
        Ok(i) => ctx.links().tsd_get(ctx.id(), i),
        Err(_) => 0,
    }
}

pub fn set_specific(ctx: &ThreadCtx, key: TsdKey, value: usize) -> ThreadResult<()> {
    let i = ctx.domain().keys().check(key)?;
    if ctx.links().tsd_set(ctx.id(), i, value) {
        Ok(())
    } else {
        Err(ThreadError::InvalidArgument)
    }
}

/// Exit-time sweep of `id`'s page.
///
/// Destructors are chosen under the key table lock and called after it is
/// released. A key deleted once the sweep has taken its snapshot (even by
/// an earlier destructor of the same sweep) still gets its destructor called
/// for this thread, exactly once.
pub(crate) fn run_destructors(domain: &Domain, id: TdId) {
    let table = domain.keys();
    let pending: Vec<(Destructor, usize)> = {
        let slots = table.slots.lock();
        domain
            .threads()
            .tsd_take_all(id)
            .into_iter()
            .filter_map(|(word, value)| {
                let slot = slots.get(word)?;
                if word < table.reserved || !slot.used {
                    return None;
                }
                slot.destructor.clone().map(|d| (d, value))
            })
            .collect()
    };
    for (destructor, value) in pending {
        destructor(value);
    }
}
