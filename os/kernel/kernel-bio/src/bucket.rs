//! Index-linked circular lists for the hash buckets.
//!
//! All buffers and all bucket heads share one link arena: nodes
//! `0..nbuf` are buffers, nodes `nbuf..nbuf + nbucket` are the sentinel
//! heads. A node's links may only be touched while holding the lock of the
//! bucket it currently belongs to; [`Bucket`] lives inside that lock, so its
//! `&mut self` methods are the proof.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicUsize, Ordering};

pub(crate) struct Links {
    next: Box<[AtomicUsize]>,
    prev: Box<[AtomicUsize]>,
}

impl Links {
    /// `nodes` entries, each linked to itself.
    pub(crate) fn new(nodes: usize) -> Self {
        let selfish = || (0..nodes).map(AtomicUsize::new).collect();
        Self {
            next: selfish(),
            prev: selfish(),
        }
    }

    fn next(&self, node: usize) -> usize {
        self.next[node].load(Ordering::Relaxed)
    }

    fn prev(&self, node: usize) -> usize {
        self.prev[node].load(Ordering::Relaxed)
    }

    fn set_next(&self, node: usize, to: usize) {
        self.next[node].store(to, Ordering::Relaxed);
    }

    fn set_prev(&self, node: usize, to: usize) {
        self.prev[node].store(to, Ordering::Relaxed);
    }
}

/// Membership list of one bucket, identified by its sentinel node.
pub(crate) struct Bucket {
    head: usize,
}

impl Bucket {
    pub(crate) const fn new(head: usize) -> Self {
        Self { head }
    }

    pub(crate) fn push_front(&mut self, links: &Links, node: usize) {
        let first = links.next(self.head);
        links.set_next(node, first);
        links.set_prev(node, self.head);
        links.set_prev(first, node);
        links.set_next(self.head, node);
    }

    /// Unlinks `node`, which must be a member of this bucket.
    pub(crate) fn remove(&mut self, links: &Links, node: usize) {
        debug_assert_ne!(node, self.head, "bucket: removing the sentinel");
        let (prev, next) = (links.prev(node), links.next(node));
        links.set_next(prev, next);
        links.set_prev(next, prev);
        links.set_next(node, node);
        links.set_prev(node, node);
    }

    pub(crate) fn iter<'a>(&'a self, links: &'a Links) -> impl Iterator<Item = usize> + 'a {
        let head = self.head;
        let mut at = links.next(head);
        core::iter::from_fn(move || {
            (at != head).then(|| {
                let node = at;
                at = links.next(node);
                node
            })
        })
    }
}
