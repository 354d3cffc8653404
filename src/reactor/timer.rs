//! Idle-connection timers.
//!
//! A binary min-heap keyed by expiry. The reactor keeps one node per live
//! connection, pushes it back on activity with [`TimerHeap::adjust`] and
//! evicts whatever [`TimerHeap::pop_expired`] returns on each tick.

use crate::error::{Error, Result};

use std::time::Instant;

/// Identifies one node in a [`TimerHeap`].
///
/// Handles are never reused for the lifetime of a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// A scheduled expiry carrying user data.
///
/// In the server the data is the token of the connection to evict.
#[derive(Debug)]
pub struct TimerNode<T> {
    /// The absolute time at which the timer fires.
    expiry: Instant,

    handle: TimerHandle,

    data: T,
}

impl<T> TimerNode<T> {
    pub fn expiry(&self) -> Instant {
        self.expiry
    }

    pub fn handle(&self) -> TimerHandle {
        self.handle
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }
}

/// An array-backed binary min-heap of timers ordered by expiry.
///
/// The root is always the node with the earliest expiry. Insertion is
/// `O(log n)`; removal of an arbitrary node is a linear search followed by a
/// `O(log n)` restore, which is fine for the bounded connection counts this
/// server handles.
///
/// The heap is owned by the reactor thread and is not synchronized.
///
/// # Examples
///
/// ```rust
/// use beacon::reactor::TimerHeap;
/// use std::time::{Duration, Instant};
///
/// let now = Instant::now();
/// let mut heap = TimerHeap::new(4);
/// heap.add(now + Duration::from_secs(10), "idle");
/// heap.add(now, "expired");
///
/// let mut fired = Vec::new();
/// heap.pop_expired(now, |name| fired.push(name));
/// assert_eq!(fired, vec!["expired"]);
/// assert_eq!(heap.len(), 1);
/// ```
pub struct TimerHeap<T> {
    /// Heap-ordered nodes; `nodes[0]` is the root.
    nodes: Vec<TimerNode<T>>,

    /// Logical capacity, doubled whenever an insertion finds it full.
    capacity: usize,

    /// Next handle value to hand out.
    next_handle: u64,
}

impl<T> TimerHeap<T> {
    /// Creates an empty heap able to hold `capacity` nodes before growing.
    pub fn new(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            capacity,
            next_handle: 0,
        }
    }

    /// Builds a heap from existing `(expiry, data)` pairs in `O(n)`.
    ///
    /// Returns the heap and the handles of the entries, in input order.
    /// Fails if `capacity` cannot hold the entries.
    pub fn from_entries(
        entries: Vec<(Instant, T)>,
        capacity: usize,
    ) -> Result<(Self, Vec<TimerHandle>)> {
        if capacity < entries.len() {
            return Err(Error::invalid(format!(
                "timer heap capacity {capacity} is smaller than {} initial entries",
                entries.len()
            )));
        }

        let mut heap = Self::new(capacity);
        let mut handles = Vec::with_capacity(entries.len());

        for (expiry, data) in entries {
            let handle = heap.next_handle();
            handles.push(handle);
            heap.nodes.push(TimerNode {
                expiry,
                handle,
                data,
            });
        }

        if heap.nodes.len() > 1 {
            for i in (0..=(heap.nodes.len() - 2) / 2).rev() {
                heap.sift_down(i);
            }
        }

        Ok((heap, handles))
    }

    /// Schedules `data` to fire at `expiry`.
    pub fn add(&mut self, expiry: Instant, data: T) -> TimerHandle {
        if self.nodes.len() >= self.capacity {
            self.grow();
        }

        let handle = self.next_handle();
        self.nodes.push(TimerNode {
            expiry,
            handle,
            data,
        });
        self.sift_up(self.nodes.len() - 1);

        handle
    }

    /// Removes the node identified by `handle` and returns it.
    ///
    /// # Panics
    ///
    /// Panics if the handle is not in the heap. A connection owns exactly
    /// one live timer, so a missing node means its lifecycle is corrupted.
    pub fn remove(&mut self, handle: TimerHandle) -> TimerNode<T> {
        let Some(index) = self.position(handle) else {
            panic!("timer {handle:?} is not present in the heap");
        };

        self.remove_at(index)
    }

    /// Moves the node identified by `handle` to a new expiry.
    ///
    /// # Panics
    ///
    /// Panics if the handle is not in the heap.
    pub fn adjust(&mut self, handle: TimerHandle, expiry: Instant) {
        let Some(index) = self.position(handle) else {
            panic!("timer {handle:?} is not present in the heap");
        };

        let earlier = expiry < self.nodes[index].expiry;
        self.nodes[index].expiry = expiry;

        if earlier {
            self.sift_up(index);
        } else {
            self.sift_down(index);
        }
    }

    /// Fires every timer whose expiry is at or before `now`.
    ///
    /// Each expired node is removed from the heap, then `callback` receives
    /// its data. Stops at the first root that has not expired yet. Returns the
    /// number of fired timers.
    pub fn pop_expired<F>(&mut self, now: Instant, mut callback: F) -> usize
    where
        F: FnMut(T),
    {
        let mut fired = 0;

        while let Some(root) = self.nodes.first() {
            if root.expiry > now {
                break;
            }

            let node = self.remove_at(0);
            callback(node.data);
            fired += 1;
        }

        fired
    }

    /// The node that fires next, if any.
    pub fn peek(&self) -> Option<&TimerNode<T>> {
        self.nodes.first()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn next_handle(&mut self) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn position(&self, handle: TimerHandle) -> Option<usize> {
        self.nodes.iter().position(|node| node.handle == handle)
    }

    fn grow(&mut self) {
        let new_capacity = if self.capacity == 0 {
            1
        } else {
            self.capacity * 2
        };

        self.nodes.reserve_exact(new_capacity - self.nodes.len());
        self.capacity = new_capacity;
    }

    /// Swaps the node at `index` with the last one, pops it and restores
    /// the heap property around the moved node.
    fn remove_at(&mut self, index: usize) -> TimerNode<T> {
        let node = self.nodes.swap_remove(index);

        if index < self.nodes.len() {
            // The former last node can be smaller than its new parent when
            // it came from a different subtree.
            let index = self.sift_up(index);
            self.sift_down(index);
        }

        node
    }

    fn sift_up(&mut self, mut hole: usize) -> usize {
        while hole > 0 {
            let parent = (hole - 1) / 2;

            if self.nodes[parent].expiry <= self.nodes[hole].expiry {
                break;
            }

            self.nodes.swap(parent, hole);
            hole = parent;
        }

        hole
    }

    fn sift_down(&mut self, mut hole: usize) {
        let len = self.nodes.len();

        loop {
            let mut child = hole * 2 + 1;
            if child >= len {
                break;
            }

            if child + 1 < len && self.nodes[child + 1].expiry < self.nodes[child].expiry {
                child += 1;
            }

            if self.nodes[child].expiry < self.nodes[hole].expiry {
                self.nodes.swap(child, hole);
                hole = child;
            } else {
                break;
            }
        }
    }
}
