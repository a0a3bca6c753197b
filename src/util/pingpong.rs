//! Publish-after-complete double buffering.
//!
//! The acquisition engines stream sensor data into one buffer while
//! clients read the other. The only shared coordination state is the
//! active index, and it moves exactly once per frame, in the writer's
//! completion ISR, *after* the buffer is fully written: readers that
//! load the index and read that buffer see complete, stable data for
//! as long as the writer stays on the other side.
//!
//! A reader that holds on across a whole further frame period can
//! still be lapped; clients that need a frame for longer than that
//! copy it out first (the engines keep a separate stable-copy buffer
//! for exactly that purpose).

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

pub struct PingPong<T> {
    bufs: [UnsafeCell<T>; 2],
    /// Index of the buffer readers should use; the writer owns the
    /// other one.
    front: AtomicUsize,
}

// Safety: writers and readers are partitioned by `front`, per the
// module contract.
unsafe impl<T: Send> Sync for PingPong<T> {}

impl<T> PingPong<T> {
    pub const fn new(a: T, b: T) -> Self {
        PingPong {
            bufs: [UnsafeCell::new(a), UnsafeCell::new(b)],
            front: AtomicUsize::new(0),
        }
    }

    /// Index of the buffer the writer may fill.
    pub fn back_index(&self) -> usize {
        1 - self.front.load(Ordering::Relaxed)
    }

    /// Raw pointer to the back buffer, for handing to DMA hardware.
    pub fn back_ptr(&self) -> *mut T {
        self.bufs[self.back_index()].get()
    }

    /// Raw pointer to a specific buffer (0 or 1), for programming
    /// fixed DMA targets once at startup.
    pub fn buf_ptr(&self, idx: usize) -> *mut T {
        self.bufs[idx].get()
    }

    /// Mutable access to the back buffer.
    ///
    /// # Safety
    ///
    /// Only the single writer may call this, and not while any DMA
    /// transfer it started into the same buffer is still running.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn back_mut(&self) -> &mut T {
        &mut *self.back_ptr()
    }

    /// Flips the freshly completed back buffer to the front. Called
    /// from the writer's completion ISR only, once the buffer contents
    /// are final. Returns the new back index for the writer's next
    /// frame.
    pub fn publish(&self) -> usize {
        let new_front = self.back_index();
        self.front.store(new_front, Ordering::Release);
        1 - new_front
    }

    /// Runs `body` against the current front buffer. The reference
    /// must not escape the closure; see the module docs for how long
    /// the data stays stable.
    pub fn with_front<R>(&self, body: impl FnOnce(&T) -> R) -> R {
        let idx = self.front.load(Ordering::Acquire);
        // Safety: the writer only touches the other buffer until the
        // next publish.
        body(unsafe { &*self.bufs[idx].get() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_reading_buffer_zero() {
        let pp = PingPong::new(10u32, 20u32);
        assert_eq!(pp.back_index(), 1);
        assert_eq!(pp.with_front(|v| *v), 10);
    }

    #[test]
    fn publish_swaps_roles() {
        let pp = PingPong::new(0u32, 0u32);
        unsafe {
            *pp.back_mut() = 111;
        }
        // Not visible until published.
        assert_eq!(pp.with_front(|v| *v), 0);
        let next_back = pp.publish();
        assert_eq!(next_back, 0);
        assert_eq!(pp.with_front(|v| *v), 111);

        unsafe {
            *pp.back_mut() = 222;
        }
        pp.publish();
        assert_eq!(pp.with_front(|v| *v), 222);
        assert_eq!(pp.back_index(), 1);
    }

    #[test]
    fn works_with_array_frames() {
        let pp = PingPong::new([0u8; 16], [0u8; 16]);
        unsafe {
            pp.back_mut()[3] = 7;
        }
        pp.publish();
        assert_eq!(pp.with_front(|f| f[3]), 7);
    }
}
