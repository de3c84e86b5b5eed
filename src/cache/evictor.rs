//! Recency ("age") queue driving eviction.
//!
//! An intrusive doubly-linked list over slot indices: the youngest slot is
//! the most recently used, the oldest is the next eviction victim. Links are
//! stored in flat vectors indexed by slot, so touch/remove/oldest are O(1)
//! and no pointers are held.

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<usize>,
    next: Option<usize>,
    linked: bool,
}

/// LRU ordering of resident slots.
#[derive(Debug)]
pub struct AgeQueue {
    links: Vec<Link>,
    youngest: Option<usize>,
    oldest: Option<usize>,
    len: usize,
}

impl AgeQueue {
    /// Queue able to track `nslots` slots, initially empty.
    pub fn new(nslots: usize) -> Self {
        Self {
            links: vec![Link::default(); nslots],
            youngest: None,
            oldest: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, slot: usize) -> bool {
        self.links.get(slot).is_some_and(|l| l.linked)
    }

    /// Least recently used slot.
    pub fn oldest(&self) -> Option<usize> {
        self.oldest
    }

    /// Most recently used slot.
    pub fn youngest(&self) -> Option<usize> {
        self.youngest
    }

    /// Mark `slot` as most recently used, linking it if needed.
    pub fn touch(&mut self, slot: usize) {
        if self.youngest == Some(slot) {
            return;
        }
        self.remove(slot);

        self.links[slot] = Link {
            prev: None,
            next: self.youngest,
            linked: true,
        };
        if let Some(old) = self.youngest {
            self.links[old].prev = Some(slot);
        }
        self.youngest = Some(slot);
        if self.oldest.is_none() {
            self.oldest = Some(slot);
        }
        self.len += 1;
    }

    /// Unlink `slot`. No-op if it is not queued.
    pub fn remove(&mut self, slot: usize) {
        let link = self.links[slot];
        if !link.linked {
            return;
        }

        match link.prev {
            Some(p) => self.links[p].next = link.next,
            None => self.youngest = link.next,
        }
        match link.next {
            Some(n) => self.links[n].prev = link.prev,
            None => self.oldest = link.prev,
        }

        self.links[slot] = Link::default();
        self.len -= 1;
    }

    /// Slots from oldest to youngest.
    pub fn iter_oldest_first(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.oldest, move |&s| self.links[s].prev)
    }
}
