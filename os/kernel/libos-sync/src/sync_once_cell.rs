use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const FULL: u8 = 2;

/// A cell written exactly once, readable from any thread afterwards.
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    slot: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            slot: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// `Some` once initialization has completed.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == FULL {
            // SAFETY: FULL is only published after the write.
            Some(unsafe { (*self.slot.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Run `init` if nobody has yet; every caller gets the stored value.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        if let Some(value) = self.get() {
            return value;
        }

        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            let value = init();
            unsafe {
                (*self.slot.get()).write(value);
            }
            self.state.store(FULL, Ordering::Release);
        } else {
            while self.state.load(Ordering::Acquire) != FULL {
                spin_loop();
            }
        }

        // SAFETY: FULL from here on.
        unsafe { (*self.slot.get()).assume_init_ref() }
    }

    /// Store `value` unless the cell is already set; returns it back on conflict.
    ///
    /// # Errors
    /// The cell already holds (or is receiving) a value.
    pub fn set(&self, value: T) -> Result<(), T> {
        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }
        unsafe {
            (*self.slot.get()).write(value);
        }
        self.state.store(FULL, Ordering::Release);
        Ok(())
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == FULL {
            unsafe { self.slot.get_mut().assume_init_drop() }
        }
    }
}

// Safety: single writer during init, shared reads afterwards.
unsafe impl<T: Sync + Send> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}
