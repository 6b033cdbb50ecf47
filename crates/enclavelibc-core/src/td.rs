//! Thread descriptor arena.
//!
//! One slot per live thread. A slot holds the thread's queue link, its queue
//! membership tag, its thread-specific-data page, and (for threads the
//! domain spawned) the new-thread request it is serving. Slots are recycled
//! through a free list and every recycle bumps the slot generation, so a
//! [`TdId`] kept past its thread's exit is detected as stale instead of
//! aliasing the next occupant.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::domain::fatal;
use crate::error::{ThreadError, ThreadResult};
use crate::pthread::thread::NewThreadRequest;
use crate::spinlock::Spinlock;
use crate::supervisor::HostThread;
use crate::waitqueue::{QueueLinks, QueueTag};

/// Generation-checked handle to a thread descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TdId {
    index: u32,
    generation: u32,
}

const NIL_LINK: u64 = u64::MAX;
const NO_QUEUE: u64 = 0;

impl TdId {
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Name under which the supervisor knows this thread.
    #[must_use]
    pub const fn host(self) -> HostThread {
        HostThread(self.index)
    }

    /// Packs into a word. Never zero for a real descriptor.
    #[must_use]
    pub const fn to_raw(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    #[must_use]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        let generation = (raw >> 32) as u32;
        if generation == 0 {
            return None;
        }
        Some(Self {
            index: raw as u32,
            generation,
        })
    }
}

impl fmt::Display for TdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "td#{}.{}", self.index, self.generation)
    }
}

struct TdSlot {
    generation: AtomicU32,
    live: AtomicBool,
    next: AtomicU64,
    queue: AtomicU64,
    request: Spinlock<Option<Arc<NewThreadRequest>>>,
    tsd: Box<[AtomicUsize]>,
}

impl TdSlot {
    fn new(tsd_words: usize) -> Self {
        Self {
            generation: AtomicU32::new(1),
            live: AtomicBool::new(false),
            next: AtomicU64::new(NIL_LINK),
            queue: AtomicU64::new(NO_QUEUE),
            request: Spinlock::new(None),
            tsd: (0..tsd_words).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    fn holds(&self, id: TdId) -> bool {
        self.live.load(Ordering::Acquire) && self.generation.load(Ordering::Acquire) == id.generation
    }
}

pub struct ThreadTable {
    slots: Box<[TdSlot]>,
    free: Spinlock<Vec<u32>>,
}

impl ThreadTable {
    pub fn new(capacity: usize, tsd_words: usize) -> Self {
        let slots: Box<[TdSlot]> = (0..capacity).map(|_| TdSlot::new(tsd_words)).collect();
        // Popped from the end, so the lowest index is handed out first.
        let free = (0..capacity as u32).rev().collect();
        Self {
            slots,
            free: Spinlock::new(free),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.capacity() - self.free.lock().len()
    }

    /// Takes a free slot for a new thread.
    pub fn reserve(&self) -> ThreadResult<TdId> {
        let index = self.free.lock().pop().ok_or(ThreadError::OutOfMemory)?;
        let slot = &self.slots[index as usize];
        slot.live.store(true, Ordering::Release);
        Ok(TdId {
            index,
            generation: slot.generation.load(Ordering::Acquire),
        })
    }

    /// Returns a slot to the free list and invalidates every outstanding handle to it.
    pub fn release(&self, id: TdId) {
        let Some(slot) = self.slot(id) else {
            fatal("release of a stale thread descriptor");
        };
        if slot.queue.load(Ordering::Acquire) != NO_QUEUE {
            fatal("thread descriptor released while still enlisted in a wait queue");
        }
        for word in slot.tsd.iter() {
            word.store(0, Ordering::Relaxed);
        }
        *slot.request.lock() = None;
        slot.next.store(NIL_LINK, Ordering::Relaxed);
        let mut next_gen = id.generation.wrapping_add(1);
        if next_gen == 0 {
            next_gen = 1;
        }
        slot.generation.store(next_gen, Ordering::Release);
        slot.live.store(false, Ordering::Release);
        self.free.lock().push(id.index);
    }

    #[must_use]
    pub fn is_live(&self, id: TdId) -> bool {
        self.slot(id).is_some()
    }

    fn slot(&self, id: TdId) -> Option<&TdSlot> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.holds(id))
    }

    fn live_slot(&self, id: TdId) -> &TdSlot {
        match self.slot(id) {
            Some(slot) => slot,
            None => fatal("stale thread descriptor used as a queue node"),
        }
    }

    // -----------------------------------------------------------------------
    // Thread-specific data page
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn tsd_words(&self) -> usize {
        self.slots.first().map_or(0, |s| s.tsd.len())
    }

    pub(crate) fn tsd_get(&self, id: TdId, word: usize) -> usize {
        self.slot(id)
            .and_then(|s| s.tsd.get(word))
            .map_or(0, |w| w.load(Ordering::Acquire))
    }

    pub(crate) fn tsd_set(&self, id: TdId, word: usize, value: usize) -> bool {
        match self.slot(id).and_then(|s| s.tsd.get(word)) {
            Some(w) => {
                w.store(value, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Clears the page, yielding each `(word, value)` that was non-zero.
    pub(crate) fn tsd_take_all(&self, id: TdId) -> Vec<(usize, usize)> {
        let Some(slot) = self.slot(id) else {
            return Vec::new();
        };
        slot.tsd
            .iter()
            .enumerate()
            .filter_map(|(i, w)| {
                let v = w.swap(0, Ordering::AcqRel);
                (v != 0).then_some((i, v))
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // New-thread request binding
    // -----------------------------------------------------------------------

    pub(crate) fn bind_request(&self, id: TdId, request: Arc<NewThreadRequest>) {
        let slot = self.live_slot(id);
        *slot.request.lock() = Some(request);
    }

    pub(crate) fn request(&self, id: TdId) -> Option<Arc<NewThreadRequest>> {
        self.slot(id).and_then(|s| s.request.lock().clone())
    }

    pub(crate) fn unbind_request(&self, id: TdId) -> Option<Arc<NewThreadRequest>> {
        self.slot(id).and_then(|s| s.request.lock().take())
    }
}

impl QueueLinks for ThreadTable {
    type Node = TdId;

    fn next(&self, node: TdId) -> Option<TdId> {
        let raw = self.live_slot(node).next.load(Ordering::Acquire);
        if raw == NIL_LINK {
            None
        } else {
            TdId::from_raw(raw)
        }
    }

    fn set_next(&self, node: TdId, next: Option<TdId>) {
        let raw = next.map_or(NIL_LINK, TdId::to_raw);
        self.live_slot(node).next.store(raw, Ordering::Release);
    }

    fn claim(&self, node: TdId, tag: QueueTag) -> bool {
        self.live_slot(node)
            .queue
            .compare_exchange(NO_QUEUE, tag.get(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn unclaim(&self, node: TdId, tag: QueueTag) {
        if self
            .live_slot(node)
            .queue
            .compare_exchange(tag.get(), NO_QUEUE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            fatal("thread descriptor left a wait queue it was not in");
        }
    }

    fn is_claimed_by(&self, node: TdId, tag: QueueTag) -> bool {
        self.slot(node)
            .is_some_and(|s| s.queue.load(Ordering::Acquire) == tag.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waitqueue::WaitQueue;

    #[test]
    fn reserve_until_full_then_out_of_memory() {
        let table = ThreadTable::new(2, 4);
        let a = table.reserve().expect("slot");
        let b = table.reserve().expect("slot");
        assert_eq!((a.index(), b.index()), (0, 1));
        assert_eq!(table.reserve(), Err(ThreadError::OutOfMemory));
        assert_eq!(table.live_count(), 2);
    }

    #[test]
    fn release_bumps_generation_and_stales_old_handles() {
        let table = ThreadTable::new(1, 4);
        let first = table.reserve().expect("slot");
        assert!(table.tsd_set(first, 3, 77));
        table.release(first);
        assert!(!table.is_live(first));
        let second = table.reserve().expect("slot");
        assert_eq!(second.index(), first.index());
        assert_ne!(second.generation(), first.generation());
        assert_eq!(table.tsd_get(second, 3), 0);
        assert_eq!(table.tsd_get(first, 3), 0);
        assert!(!table.tsd_set(first, 3, 1));
    }

    #[test]
    fn raw_round_trip_and_zero_is_never_a_handle() {
        let table = ThreadTable::new(3, 1);
        let _ = table.reserve().expect("slot");
        let id = table.reserve().expect("slot");
        assert_eq!(TdId::from_raw(id.to_raw()), Some(id));
        assert_ne!(id.to_raw(), 0);
        assert_eq!(TdId::from_raw(0), None);
    }

    #[test]
    fn tsd_out_of_range_word_is_ignored() {
        let table = ThreadTable::new(1, 2);
        let id = table.reserve().expect("slot");
        assert!(!table.tsd_set(id, 2, 9));
        assert_eq!(table.tsd_get(id, 2), 0);
        assert!(table.tsd_set(id, 1, 9));
        assert_eq!(table.tsd_take_all(id), vec![(1, 9)]);
        assert_eq!(table.tsd_get(id, 1), 0);
    }

    #[test]
    fn descriptors_link_through_the_arena() {
        let table = ThreadTable::new(3, 1);
        let ids: Vec<TdId> = (0..3).map(|_| table.reserve().expect("slot")).collect();
        let mut q = WaitQueue::new();
        for &id in &ids {
            q.push_back(&table, id);
        }
        assert!(q.contains(&table, ids[1]));
        assert!(q.remove(&table, ids[1]));
        assert_eq!(q.drain(&table), vec![ids[0], ids[2]]);
        for id in ids {
            table.release(id);
        }
        assert_eq!(table.live_count(), 0);
    }
}
