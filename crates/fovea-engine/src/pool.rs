//! Per-GPU pool of pre-allocated frame buffers.
//!
//! Exactly `tasks_in_queue_per_gpu` buffers exist per GPU for the life of a
//! job. The decode stage blocks on `acquire` when all of them are in
//! flight, which is the backpressure that throttles the loader. Buffers
//! travel inside [`PooledFrames`] guards and find their own way home on
//! drop, so the occupancy invariant holds on every exit path.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

use fovea_core::error::{EngineError, Result};
use fovea_cuda::FrameBuffer;

use crate::abort::AbortFlag;

const ACQUIRE_POLL: Duration = Duration::from_millis(50);

pub struct FramePool {
    tx: Sender<FrameBuffer>,
    rx: Receiver<FrameBuffer>,
    capacity: usize,
}

impl FramePool {
    pub fn new(buffers: Vec<FrameBuffer>) -> Self {
        let capacity = buffers.len();
        let (tx, rx) = bounded(capacity);
        for buffer in buffers {
            // Cannot fail: the channel was sized to hold every buffer.
            let _ = tx.send(buffer);
        }
        Self { tx, rx, capacity }
    }

    /// Take a buffer, blocking under backpressure. Bails out with
    /// [`EngineError::Aborted`] once the abort flag is raised so a failed
    /// downstream stage cannot wedge shutdown.
    pub fn acquire(&self, abort: &AbortFlag) -> Result<PooledFrames> {
        loop {
            match self.rx.recv_timeout(ACQUIRE_POLL) {
                Ok(buffer) => {
                    return Ok(PooledFrames {
                        buffer: Some(buffer),
                        home: self.tx.clone(),
                    });
                }
                Err(RecvTimeoutError::Timeout) => {
                    if abort.is_set() {
                        return Err(EngineError::Aborted);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(EngineError::ChannelClosed),
            }
        }
    }

    pub fn available(&self) -> usize {
        self.rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Clone for FramePool {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            capacity: self.capacity,
        }
    }
}

/// Loan of one pool buffer to a decode/evaluate pair.
pub struct PooledFrames {
    buffer: Option<FrameBuffer>,
    home: Sender<FrameBuffer>,
}

impl PooledFrames {
    pub fn buffer(&self) -> &FrameBuffer {
        self.buffer.as_ref().expect("buffer present until drop")
    }

    pub fn buffer_mut(&mut self) -> &mut FrameBuffer {
        self.buffer.as_mut().expect("buffer present until drop")
    }

    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PooledFrames {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            // If the pool is already gone the buffer frees here instead.
            let _ = self.home.send(buffer);
        }
    }
}

impl std::fmt::Debug for PooledFrames {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledFrames")
            .field("len", &self.buffer.as_ref().map(|b| b.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fovea_cuda::{GpuDevice, GpuRuntime};

    fn pool_of(n: usize) -> FramePool {
        let device = GpuDevice::open(&GpuRuntime::Host, 0).unwrap();
        FramePool::new((0..n).map(|_| device.alloc_frames(64).unwrap()).collect())
    }

    #[test]
    fn occupancy_is_conserved() {
        let pool = pool_of(3);
        let abort = AbortFlag::new();
        assert_eq!((pool.available(), pool.capacity()), (3, 3));

        let a = pool.acquire(&abort).unwrap();
        let b = pool.acquire(&abort).unwrap();
        assert_eq!(pool.available(), 1);

        drop(a);
        assert_eq!(pool.available(), 2);
        drop(b);
        assert_eq!(pool.available(), pool.capacity());
    }

    #[test]
    fn acquire_blocks_until_a_buffer_returns() {
        let pool = pool_of(1);
        let abort = AbortFlag::new();
        let held = pool.acquire(&abort).unwrap();

        let waiter = {
            let pool = pool.clone();
            let abort = abort.clone();
            std::thread::spawn(move || pool.acquire(&abort).map(|_| ()))
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(held);
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn abort_unblocks_waiters() {
        let pool = pool_of(1);
        let abort = AbortFlag::new();
        let _held = pool.acquire(&abort).unwrap();

        let waiter = {
            let pool = pool.clone();
            let abort = abort.clone();
            std::thread::spawn(move || pool.acquire(&abort))
        };
        std::thread::sleep(Duration::from_millis(20));
        abort.set();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(EngineError::Aborted)
        ));
    }
}
