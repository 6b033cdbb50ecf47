//! FIFO of blocked threads, linked through the threads themselves.
//!
//! A queue does not own its nodes. Each node carries one `next` link and one
//! membership tag in the arena that holds it ([`QueueLinks`]); the tag names
//! the queue the node is in. Enlisting a node that already carries another
//! queue's tag aborts the domain, so a node can never be threaded into two
//! chains through its single link.
//!
//! Every mutation happens under the spinlock of the primitive that embeds the
//! queue.

use core::num::NonZeroU64;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::domain::fatal;

/// Identity of one [`WaitQueue`], stored in a node while it is enlisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueTag(NonZeroU64);

static NEXT_TAG: AtomicU64 = AtomicU64::new(1);

impl QueueTag {
    fn fresh() -> Self {
        let raw = NEXT_TAG.fetch_add(1, Ordering::Relaxed);
        match NonZeroU64::new(raw) {
            Some(tag) => Self(tag),
            None => fatal("wait queue tag space exhausted"),
        }
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

/// Link storage for queue nodes.
///
/// Implemented by the thread descriptor arena, and by small fakes in tests.
pub trait QueueLinks {
    type Node: Copy + Eq + core::fmt::Debug;

    fn next(&self, node: Self::Node) -> Option<Self::Node>;
    fn set_next(&self, node: Self::Node, next: Option<Self::Node>);

    /// Marks `node` as a member of `tag`. False if it is already enlisted anywhere.
    fn claim(&self, node: Self::Node, tag: QueueTag) -> bool;
    /// Clears the membership set by [`Self::claim`].
    fn unclaim(&self, node: Self::Node, tag: QueueTag);
    fn is_claimed_by(&self, node: Self::Node, tag: QueueTag) -> bool;
}

#[derive(Debug)]
pub struct WaitQueue<N> {
    tag: QueueTag,
    front: Option<N>,
    back: Option<N>,
}

impl<N: Copy + Eq + core::fmt::Debug> Default for WaitQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Copy + Eq + core::fmt::Debug> WaitQueue<N> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tag: QueueTag::fresh(),
            front: None,
            back: None,
        }
    }

    #[must_use]
    pub fn tag(&self) -> QueueTag {
        self.tag
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.front.is_none()
    }

    #[must_use]
    pub fn front(&self) -> Option<N> {
        self.front
    }

    /// Appends `node`. Aborts if the node is already in any queue.
    pub fn push_back<L: QueueLinks<Node = N>>(&mut self, links: &L, node: N) {
        if !links.claim(node, self.tag) {
            fatal("thread descriptor enlisted in two wait queues");
        }
        links.set_next(node, None);
        match self.back {
            Some(back) => links.set_next(back, Some(node)),
            None => self.front = Some(node),
        }
        self.back = Some(node);
    }

    pub fn pop_front<L: QueueLinks<Node = N>>(&mut self, links: &L) -> Option<N> {
        let node = self.front?;
        self.front = links.next(node);
        if self.front.is_none() {
            self.back = None;
        }
        links.set_next(node, None);
        links.unclaim(node, self.tag);
        Some(node)
    }

    /// Membership test in O(1) through the node's tag.
    #[must_use]
    pub fn contains<L: QueueLinks<Node = N>>(&self, links: &L, node: N) -> bool {
        links.is_claimed_by(node, self.tag)
    }

    /// Unlinks `node` wherever it sits. False if it was not enlisted here.
    pub fn remove<L: QueueLinks<Node = N>>(&mut self, links: &L, node: N) -> bool {
        if !self.contains(links, node) {
            return false;
        }
        let mut prev: Option<N> = None;
        let mut cursor = self.front;
        while let Some(cur) = cursor {
            let next = links.next(cur);
            if cur == node {
                match prev {
                    Some(p) => links.set_next(p, next),
                    None => self.front = next,
                }
                if self.back == Some(cur) {
                    self.back = prev;
                }
                links.set_next(cur, None);
                links.unclaim(cur, self.tag);
                return true;
            }
            prev = Some(cur);
            cursor = next;
        }
        fatal("wait queue tag set on a node missing from the chain")
    }

    /// Empties the queue into a FIFO snapshot.
    ///
    /// Each node's link is read before it is released, so the caller may wake
    /// the returned nodes after dropping the spinlock without walking links
    /// that the woken threads are already rewriting.
    pub fn drain<L: QueueLinks<Node = N>>(&mut self, links: &L) -> Vec<N> {
        let mut out = Vec::new();
        while let Some(node) = self.pop_front(links) {
            out.push(node);
        }
        out
    }

    #[must_use]
    pub fn len<L: QueueLinks<Node = N>>(&self, links: &L) -> usize {
        let mut n = 0;
        let mut cursor = self.front;
        while let Some(cur) = cursor {
            n += 1;
            cursor = links.next(cur);
        }
        n
    }
}
