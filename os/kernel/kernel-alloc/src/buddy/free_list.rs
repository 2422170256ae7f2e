/// Sentinel index terminating a list.
pub(super) const NIL: u32 = u32::MAX;

/// Per-frame link slot.
///
/// The link table holds one slot per 4 KiB frame of the arena, indexed by
/// `(pa - base) / 4096`. Only the slot of a free block's first frame is
/// meaningful; slots of allocated frames and of frames inside a free block
/// are left alone.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FreeLink {
    prev: u32,
    next: u32,
}

impl FreeLink {
    /// An unlinked slot. Link tables start out filled with this.
    pub const EMPTY: Self = Self { prev: NIL, next: NIL };
}

impl Default for FreeLink {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[inline]
const fn slot(i: u32) -> usize {
    i as usize
}

#[inline]
fn link(i: u32) -> Option<u32> {
    (i != NIL).then_some(i)
}

/// Doubly linked list of free blocks of one order, sorted by frame index
/// (and therefore by physical address).
///
/// The nodes live in a link table shared by all orders; the list itself only
/// stores its ends and length.
///
/// # Invariants
/// - Indices strictly increase from `head` to `tail`.
/// - `len` equals the number of reachable nodes.
pub(super) struct FreeList {
    head: u32,
    tail: u32,
    len: usize,
}

impl FreeList {
    pub(super) const fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    pub(super) const fn len(&self) -> usize {
        self.len
    }

    pub(super) const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert `idx` in address order and return its new neighbours.
    ///
    /// Appending past the tail is O(1), which keeps ascending bulk inserts
    /// during initialization linear.
    pub(super) fn insert(&mut self, links: &mut [FreeLink], idx: u32) -> (Option<u32>, Option<u32>) {
        let next = if self.tail == NIL || idx > self.tail {
            NIL
        } else {
            let mut cur = self.head;
            while cur != NIL && cur < idx {
                cur = links[slot(cur)].next;
            }
            cur
        };
        debug_assert_ne!(next, idx, "block {idx} is already free");

        let prev = if next == NIL { self.tail } else { links[slot(next)].prev };
        links[slot(idx)] = FreeLink { prev, next };
        if prev == NIL {
            self.head = idx;
        } else {
            links[slot(prev)].next = idx;
        }
        if next == NIL {
            self.tail = idx;
        } else {
            links[slot(next)].prev = idx;
        }
        self.len += 1;
        (link(prev), link(next))
    }

    /// Unlink `idx`, which must be on this list.
    pub(super) fn remove(&mut self, links: &mut [FreeLink], idx: u32) {
        let FreeLink { prev, next } = links[slot(idx)];
        if prev == NIL {
            self.head = next;
        } else {
            links[slot(prev)].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            links[slot(next)].prev = prev;
        }
        links[slot(idx)] = FreeLink::EMPTY;
        self.len -= 1;
    }

    /// Remove and return the lowest-addressed block.
    pub(super) fn pop_front(&mut self, links: &mut [FreeLink]) -> Option<u32> {
        let head = link(self.head)?;
        self.remove(links, head);
        Some(head)
    }

    pub(super) fn iter<'a>(&self, links: &'a [FreeLink]) -> impl Iterator<Item = u32> + 'a {
        let mut cur = self.head;
        core::iter::from_fn(move || {
            let i = link(cur)?;
            cur = links[slot(i)].next;
            Some(i)
        })
    }
}
