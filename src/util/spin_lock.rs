//! Bare-metal spinlock for sharing state with interrupt handlers.
//!
//! Like `std::sync::Mutex` stripped to what a single-address-space
//! microcontroller needs: locking is best-effort via `try_lock`, and
//! contention is a design error rather than something to wait out. An
//! ISR that finds its lock held has been preempted by a bug (the lock
//! discipline is that task code takes these locks only in short
//! critical sections with the relevant IRQ masked), so the hardware
//! accessors below turn contention into a panic instead of a deadlock.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// A `T` guarded by an atomic flag; access only through the guard.
#[derive(Debug)]
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    contents: UnsafeCell<T>,
}

// Safety: the lock serializes all access to the contents.
unsafe impl<T: Send + ?Sized> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(contents: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            contents: UnsafeCell::new(contents),
        }
    }
}

impl<T: ?Sized + Send> SpinLock<T> {
    /// Attempts to take the lock; `None` if it is already held.
    ///
    /// The armv6-m cores have no atomic read-modify-write
    /// instructions, so on the target the test-and-set runs inside an
    /// interrupt-free critical section; it is a handful of cycles. On
    /// the host (tests) a plain atomic swap does the same job.
    pub fn try_lock(&self) -> Option<SpinLockGuard<T>> {
        if self.test_and_set() {
            None
        } else {
            // We observed the false -> true transition, so we hold the
            // lock and may create the sole mutable reference.
            Some(SpinLockGuard {
                flag: &self.locked,
                contents: unsafe { &mut *self.contents.get() },
            })
        }
    }

    /// Returns the previous lock state, leaving the lock held.
    #[cfg(target_os = "none")]
    fn test_and_set(&self) -> bool {
        cortex_m::interrupt::free(|_| {
            let was = self.locked.load(Ordering::Relaxed);
            self.locked.store(true, Ordering::Relaxed);
            was
        })
    }

    #[cfg(not(target_os = "none"))]
    fn test_and_set(&self) -> bool {
        self.locked.swap(true, Ordering::Acquire)
    }
}

/// Exclusive access to the locked contents; unlocks on drop.
#[must_use = "dropping the guard immediately unlocks"]
#[derive(Debug)]
pub struct SpinLockGuard<'a, T: ?Sized> {
    flag: &'a AtomicBool,
    contents: &'a mut T,
}

impl<'a, T: ?Sized> core::ops::Deref for SpinLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.contents
    }
}

impl<'a, T: ?Sized> core::ops::DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.contents
    }
}

impl<'a, T: ?Sized> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Takes the hardware loaned to an ISR through a `SpinLock<Option<HW>>`
/// static, panicking on the states that indicate broken interrupt
/// discipline: the lock held at ISR entry (the IRQ was enabled during
/// a critical section, or a guard leaked) or the hardware not yet
/// provisioned (the IRQ was enabled before initialization finished).
pub fn with_hw<T: Send, R>(lock: &SpinLock<Option<T>>, body: impl FnOnce(&mut T) -> R) -> R {
    let mut guard = lock.try_lock().expect("HW lock held at ISR");
    body(guard.as_mut().expect("ISR fired without HW available"))
}
