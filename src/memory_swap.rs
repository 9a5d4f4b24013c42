//! Lock-free single-writer/single-reader buffer swap.
//!
//! The audio thread calls [`MemorySwap::attempt`] every block to get
//! non-blocking access to whatever buffer is currently live; a control
//! thread calls [`MemorySwap::access`] (or `swap`/`grow`) to replace
//! the buffer's contents without ever blocking the audio thread for
//! longer than the few instructions the test-and-set lock is held.
//! There is no allocator in the hot path: the control thread owns the
//! alloc/free functions and only ever touches them off the audio
//! thread.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// Allocates a `T` sized to hold at least `capacity` items, or `None`
/// if the allocation failed.
pub type AllocFn<T> = dyn Fn(usize) -> Option<T> + Send + Sync;
/// Frees a `T` previously returned by an [`AllocFn`].
pub type FreeFn<T> = dyn Fn(T) + Send + Sync;

/// A buffer guarded by a lock-free swap, sized and freed by
/// caller-supplied closures rather than `Default`/`Drop`, so it can
/// hold externally-managed resources (aligned FFT scratch, mmap'd
/// ring buffers) as easily as a `Vec`.
pub struct MemorySwap<T> {
    lock: AtomicBool,
    slot: Option<T>,
    capacity: usize,
    alloc: Box<AllocFn<T>>,
    free: Box<FreeFn<T>>,
}

/// RAII handle returned by [`MemorySwap::access`]/[`attempt`]. Releases
/// the lock when dropped; until then it is the only way to reach the
/// buffer, so the borrow checker enforces exclusivity across threads.
///
/// [`attempt`]: MemorySwap::attempt
pub struct Handle<'a, T> {
    owner: &'a MemorySwap<T>,
}

impl<'a, T> Deref for Handle<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: holding the lock guarantees exclusive access to `slot`.
        unsafe { (*self.owner.slot_ptr()).as_ref().unwrap() }
    }
}

impl<'a, T> DerefMut for Handle<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the lock guarantees exclusive access to `slot`.
        unsafe { (*self.owner.slot_ptr()).as_mut().unwrap() }
    }
}

impl<'a, T> Drop for Handle<'a, T> {
    fn drop(&mut self) {
        self.owner.lock.store(false, Ordering::Release);
    }
}

impl<T> MemorySwap<T> {
    /// Builds an empty swap with no buffer allocated yet. `alloc`/`free`
    /// are called only from `grow`/`equal`/`drop`, never from
    /// `attempt`, so they may do real allocation work.
    pub fn new(alloc: Box<AllocFn<T>>, free: Box<FreeFn<T>>) -> Self {
        Self {
            lock: AtomicBool::new(false),
            slot: None,
            capacity: 0,
            alloc,
            free,
        }
    }

    /// Builds a swap with an initial buffer of the given capacity.
    /// Returns `None` if the allocator failed.
    pub fn with_capacity(capacity: usize, alloc: Box<AllocFn<T>>, free: Box<FreeFn<T>>) -> Option<Self> {
        let slot = alloc(capacity)?;
        Some(Self {
            lock: AtomicBool::new(false),
            slot: Some(slot),
            capacity,
            alloc,
            free,
        })
    }

    #[inline]
    fn slot_ptr(&self) -> *mut Option<T> {
        std::ptr::addr_of!(self.slot) as *mut Option<T>
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    fn lock(&self) {
        while self
            .lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    /// Non-blocking access. Returns `None` immediately if the control
    /// thread currently holds the lock (e.g. mid-`grow`), or if no
    /// buffer has ever been allocated. This is the only entry point
    /// the audio thread should call.
    pub fn attempt(&self) -> Option<Handle<'_, T>> {
        if self.slot.is_none() {
            return None;
        }
        if self.try_lock() {
            Some(Handle { owner: self })
        } else {
            None
        }
    }

    /// Blocking access, spinning until the lock is free. Intended for
    /// the control thread; never call from the audio thread.
    pub fn access(&self) -> Option<Handle<'_, T>> {
        self.slot.as_ref()?;
        self.lock();
        Some(Handle { owner: self })
    }

    /// Current allocated capacity (in whatever unit the allocator
    /// closure uses, e.g. sample count).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `true` if the current capacity is at least `capacity` already.
    pub fn equal(&self, capacity: usize) -> bool {
        self.slot.is_some() && self.capacity >= capacity
    }

    /// Grows the buffer to at least `capacity`, replacing the old one
    /// under the lock and freeing it afterward. A no-op if already
    /// large enough. Returns `false` if reallocation failed, leaving
    /// the old buffer (and its old capacity) untouched.
    pub fn grow(&mut self, capacity: usize) -> bool {
        if self.equal(capacity) {
            return true;
        }
        let Some(new_slot) = (self.alloc)(capacity) else {
            log::warn!("memory swap grow to {capacity} failed, keeping capacity {}", self.capacity);
            return false;
        };
        self.lock();
        let old = self.slot.replace(new_slot);
        self.capacity = capacity;
        self.lock.store(false, Ordering::Release);
        if let Some(old) = old {
            (self.free)(old);
        }
        true
    }

    /// Clears the buffer, dropping it back to unallocated. The audio
    /// thread observes this as `attempt` returning `None` from the
    /// next call onward.
    pub fn clear(&mut self) {
        self.lock();
        let old = self.slot.take();
        self.capacity = 0;
        self.lock.store(false, Ordering::Release);
        if let Some(old) = old {
            (self.free)(old);
        }
    }
}

// SAFETY: `T` is only ever reached through the lock, which provides
// the same exclusion a `Mutex<T>` would; `alloc`/`free` are already
// `Send + Sync` by their trait object bounds.
unsafe impl<T: Send> Send for MemorySwap<T> {}
unsafe impl<T: Send> Sync for MemorySwap<T> {}
