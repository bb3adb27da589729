//! Bounded blocking FIFO shared by one worker pool.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<Arc<T>>,
    closed: bool,
}

/// Bounded queue with blocking `push`/`pop` and removal of queued items.
///
/// `push` blocks while the queue is full; `pop` blocks while it is empty.
/// Closing wakes everybody: pending `push` calls fail and `pop` returns
/// `None`.
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> WorkQueue<T> {
    /// Creates a queue holding at most `capacity` items (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Appends an item, waiting for space.
    ///
    /// # Errors
    /// Returns the item back if the queue is closed.
    pub fn push(&self, item: Arc<T>) -> Result<(), Arc<T>> {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity && !state.closed {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Takes the oldest item, waiting until one is available.
    /// Returns `None` once the queue is closed.
    pub fn pop(&self) -> Option<Arc<T>> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Removes `item` if it is still queued.
    pub fn remove(&self, item: &Arc<T>) -> bool {
        let mut state = self.state.lock();
        let before = state.items.len();
        state.items.retain(|queued| !Arc::ptr_eq(queued, item));
        let removed = state.items.len() != before;
        drop(state);
        if removed {
            self.not_full.notify_one();
        }
        removed
    }

    /// Closes the queue and returns whatever was still waiting.
    pub fn close(&self) -> Vec<Arc<T>> {
        let mut state = self.state.lock();
        state.closed = true;
        let drained = state.items.drain(..).collect();
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
        drained
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::new(4);
        for i in 0..3 {
            queue.push(Arc::new(i)).unwrap();
        }
        let order: Vec<i32> = (0..3).filter_map(|_| queue.pop()).map(|i| *i).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_remove_queued_item() {
        let queue = WorkQueue::new(4);
        let a = Arc::new("a");
        let b = Arc::new("b");
        queue.push(a.clone()).unwrap();
        queue.push(b.clone()).unwrap();

        assert!(queue.remove(&a));
        assert!(!queue.remove(&a));
        assert_eq!(queue.len(), 1);
        assert!(queue.pop().is_some_and(|item| Arc::ptr_eq(&item, &b)));
    }

    #[test]
    fn test_push_blocks_until_space() {
        let queue = Arc::new(WorkQueue::new(1));
        queue.push(Arc::new(1)).unwrap();

        let pushed = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = queue.clone();
            let pushed = pushed.clone();
            std::thread::spawn(move || {
                queue.push(Arc::new(2)).unwrap();
                pushed.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!pushed.load(Ordering::SeqCst));

        assert_eq!(queue.pop().map(|i| *i), Some(1));
        producer.join().unwrap();
        assert!(pushed.load(Ordering::SeqCst));
        assert_eq!(queue.pop().map(|i| *i), Some(2));
    }

    #[test]
    fn test_close_wakes_consumers_and_drains() {
        let queue = Arc::new(WorkQueue::<i32>::new(2));
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.pop())
        };
        std::thread::sleep(Duration::from_millis(20));

        let drained = queue.close();

        assert!(drained.is_empty());
        assert!(consumer.join().unwrap().is_none());
        assert!(queue.push(Arc::new(1)).is_err());
    }
}
