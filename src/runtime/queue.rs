use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A thread-safe FIFO shared between producers and worker threads.
///
/// `WorkQueue` is the hand-off point between the reactor and the worker
/// pool, and between the store pool and the sessions borrowing handles.
/// Any number of producers may [`push`](Self::push) and any number of
/// consumers may pop; every item is delivered to exactly one consumer.
///
/// Blocking consumers park on a condition variable. Closing the queue is an
/// additional wake condition: once closed, [`wait_and_pop`](Self::wait_and_pop)
/// keeps returning the items still queued and then `None`, so no consumer
/// stays parked after shutdown even when the queue is empty.
pub struct WorkQueue<T> {
    /// Queued items and the closed flag, under a single lock.
    state: Mutex<State<T>>,

    /// Signalled on push (one waiter) and on close (all waiters).
    available: Condvar,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> WorkQueue<T> {
    /// Creates an empty, open queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Appends an item and wakes one blocked consumer.
    pub fn push(&self, item: T) {
        self.state.lock().unwrap().items.push_back(item);
        self.available.notify_one();
    }

    /// Appends an item unless `capacity` items are already queued.
    ///
    /// The bound is checked under the queue lock, so concurrent producers
    /// can never overshoot it. On refusal the item is handed back.
    pub fn push_bounded(&self, item: T, capacity: usize) -> Result<(), T> {
        {
            let mut state = self.state.lock().unwrap();
            if state.items.len() >= capacity {
                return Err(item);
            }
            state.items.push_back(item);
        }

        self.available.notify_one();
        Ok(())
    }

    /// Pops the front item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().unwrap().items.pop_front()
    }

    /// Blocks until an item is available or the queue is closed.
    ///
    /// Returns `None` only when the queue is closed and drained.
    pub fn wait_and_pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();

        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }

            if state.closed {
                return None;
            }

            state = self.available.wait(state).unwrap();
        }
    }

    /// Like [`wait_and_pop`](Self::wait_and_pop), but gives up after `timeout`.
    pub fn wait_and_pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();

        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }

            let now = Instant::now();
            if state.closed || now >= deadline {
                return None;
            }

            state = self.available.wait_timeout(state, deadline - now).unwrap().0;
        }
    }

    /// Closes the queue and wakes every parked consumer.
    ///
    /// Items already queued remain poppable. Pushing after close is allowed
    /// but nothing will wait for the item any more.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().items.is_empty()
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::WorkQueue;

    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn fifo_order() {
        let queue = WorkQueue::new();
        for i in 0..5 {
            queue.push(i);
        }

        let popped: Vec<_> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn bounded_push_refuses_when_full() {
        let queue = WorkQueue::new();

        assert!(queue.push_bounded(1, 2).is_ok());
        assert!(queue.push_bounded(2, 2).is_ok());
        assert_eq!(queue.push_bounded(3, 2), Err(3));
        assert_eq!(queue.len(), 2);

        queue.try_pop();
        assert!(queue.push_bounded(3, 2).is_ok());
    }

    #[test]
    fn close_wakes_blocked_consumers() {
        let queue: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new());

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || queue.wait_and_pop())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        queue.close();

        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), None);
        }
    }

    #[test]
    fn close_drains_remaining_items() {
        let queue = WorkQueue::new();
        queue.push("a");
        queue.close();

        assert!(queue.is_closed());
        assert_eq!(queue.wait_and_pop(), Some("a"));
        assert_eq!(queue.wait_and_pop(), None);
    }

    #[test]
    fn wait_with_timeout_gives_up() {
        let queue: WorkQueue<u8> = WorkQueue::new();
        let start = Instant::now();

        assert!(queue.wait_and_pop_timeout(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn every_item_is_popped_exactly_once() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 500;

        let queue = Arc::new(WorkQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let seen = seen.clone();
                thread::spawn(move || {
                    while let Some(item) = queue.wait_and_pop() {
                        seen.lock().unwrap().push(item);
                    }
                })
            })
            .collect();

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        queue.push(p * PER_PRODUCER + i);
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        queue.close();
        for consumer in consumers {
            consumer.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        let unique: HashSet<_> = seen.iter().copied().collect();
        assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
        assert_eq!(unique.len(), PRODUCERS * PER_PRODUCER);
    }
}
