/// Binary min-heap of timer deadlines, keyed by slab index.
///
/// Ordered on the deadline (wall-anchored monotonic microseconds); the root
/// is the next timer due. Equal deadlines have no defined relative order.
/// A per-key position table supports removing an arbitrary entry in
/// O(log n), which timer reset and deletion need.
#[derive(Debug)]
pub(crate) struct TimerHeap {
    nodes: Vec<Node>,
    // Position of each key in `nodes`, indexed by key.
    pos: Vec<Option<usize>>,
}

#[derive(Debug, Copy, Clone)]
struct Node {
    deadline: u64,
    key: usize,
}

impl TimerHeap {
    pub fn new() -> TimerHeap {
        TimerHeap {
            nodes: Vec::new(),
            pos: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Key and deadline of the next timer due.
    pub fn peek(&self) -> Option<(usize, u64)> {
        self.nodes.first().map(|n| (n.key, n.deadline))
    }

    pub fn insert(&mut self, key: usize, deadline: u64) {
        debug_assert!(self.pos.get(key).map_or(true, Option::is_none));
        if key >= self.pos.len() {
            self.pos.resize(key + 1, None);
        }
        let at = self.nodes.len();
        self.nodes.push(Node { deadline, key });
        self.pos[key] = Some(at);
        self.sift_up(at);
    }

    pub fn pop(&mut self) -> Option<(usize, u64)> {
        let root = *self.nodes.first()?;
        self.remove_at(0);
        Some((root.key, root.deadline))
    }

    /// Remove the entry for `key`, if present.
    pub fn remove(&mut self, key: usize) -> bool {
        match self.pos.get(key).copied().flatten() {
            Some(at) => {
                self.remove_at(at);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.pos.clear();
    }

    fn remove_at(&mut self, at: usize) {
        let last = self.nodes.len() - 1;
        let key = self.nodes[at].key;
        self.nodes.swap(at, last);
        self.nodes.pop();
        self.pos[key] = None;
        if at < self.nodes.len() {
            self.pos[self.nodes[at].key] = Some(at);
            // The swapped-in node may violate order in either direction.
            self.sift_up(at);
            self.sift_down(at);
        }
    }

    fn sift_up(&mut self, mut at: usize) {
        while at > 0 {
            let parent = (at - 1) / 2;
            if self.nodes[parent].deadline <= self.nodes[at].deadline {
                break;
            }
            self.swap(at, parent);
            at = parent;
        }
    }

    fn sift_down(&mut self, mut at: usize) {
        let len = self.nodes.len();
        loop {
            let left = 2 * at + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut min = left;
            if right < len && self.nodes[right].deadline < self.nodes[left].deadline {
                min = right;
            }
            if self.nodes[at].deadline <= self.nodes[min].deadline {
                break;
            }
            self.swap(at, min);
            at = min;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.nodes.swap(a, b);
        self.pos[self.nodes[a].key] = Some(a);
        self.pos[self.nodes[b].key] = Some(b);
    }
}

#[cfg(test)]
mod tests {
    use super::TimerHeap;

    #[test]
    fn pops_in_deadline_order() {
        let mut heap = TimerHeap::new();
        for (key, deadline) in [(0, 50), (1, 10), (2, 90), (3, 30), (4, 70)] {
            heap.insert(key, deadline);
        }
        let mut out = Vec::new();
        while let Some((_, deadline)) = heap.pop() {
            out.push(deadline);
        }
        assert_eq!(out, vec![10, 30, 50, 70, 90]);
        assert_eq!(heap.len(), 0);
    }

    #[test]
    fn remove_arbitrary() {
        let mut heap = TimerHeap::new();
        for key in 0..10 {
            heap.insert(key, 100 - key as u64 * 10);
        }
        assert!(heap.remove(9)); // current root
        assert!(heap.remove(0)); // current max
        assert!(!heap.remove(0));
        assert_eq!(heap.len(), 8);

        let mut prev = 0;
        while let Some((key, deadline)) = heap.pop() {
            assert!(deadline >= prev);
            assert!(key != 0 && key != 9);
            prev = deadline;
        }
    }

    #[test]
    fn key_reuse_after_pop() {
        let mut heap = TimerHeap::new();
        heap.insert(3, 5);
        assert_eq!(heap.pop(), Some((3, 5)));
        heap.insert(3, 7);
        assert_eq!(heap.peek(), Some((3, 7)));
    }
}
