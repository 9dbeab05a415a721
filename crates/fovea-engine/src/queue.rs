//! Blocking MPMC work queue connecting pipeline stages.

use crossbeam_channel::{Receiver, Sender, unbounded};

use fovea_core::error::{EngineError, Result};

/// FIFO channel of work entries.
///
/// `push` never drops or blocks (the pool and the distribution threshold
/// bound how much can be in flight); `pop` blocks until an entry arrives.
/// `len` is advisory and feeds the distribution heuristic.
pub struct WorkQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn push(&self, entry: T) -> Result<()> {
        self.tx.send(entry).map_err(|_| EngineError::ChannelClosed)
    }

    pub fn pop(&self) -> Result<T> {
        self.rx.recv().map_err(|_| EngineError::ChannelClosed)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fifo_across_producers_and_consumers() {
        let queue = WorkQueue::new();
        for i in 0..4 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.len(), 4);
        assert_eq!((0..4).map(|_| queue.pop().unwrap()).collect::<Vec<_>>(), vec![
            0, 1, 2, 3
        ]);
    }

    #[test]
    fn pop_blocks_until_push() {
        let queue = WorkQueue::new();
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.pop().unwrap())
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.push(9usize).unwrap();
        assert_eq!(consumer.join().unwrap(), 9);
    }
}
