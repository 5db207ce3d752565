//! # Thread Stacks
//!
//! A [`Stack`] is one heap allocation owned by exactly one TCB. It is
//! never aliased by another context and is released exactly once, when the
//! owning TCB is dropped by the scheduler (which never drops the TCB of the
//! thread currently executing).
//!
//! The lowest word holds a canary. Stacks grow down, so a thread that runs
//! off the end of its stack overwrites the canary first; the scheduler
//! checks it every time a thread is switched out.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Stack alignment required by both supported ABIs.
const ALIGN: usize = 16;

const CANARY: u64 = 0xDEAD_BEEF_CAFE_BABE;

pub struct Stack {
    base: NonNull<u8>,
    size: usize,
}

impl Stack {
    /// Allocate a stack of at least `size` bytes, rounded up to the
    /// alignment.
    ///
    /// Aborts through [`alloc::handle_alloc_error`] if the allocator fails.
    pub fn new(size: usize) -> Self {
        let size = size.max(ALIGN * 4).next_multiple_of(ALIGN);
        let layout = Self::layout(size);
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc::alloc(layout) };
        let Some(base) = NonNull::new(ptr) else {
            alloc::handle_alloc_error(layout);
        };
        // SAFETY: base is valid for `size` bytes and 16-byte aligned.
        unsafe { (base.as_ptr() as *mut u64).write(CANARY) };
        Self { base, size }
    }

    /// Size of the stack in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// One past the highest usable byte; 16-byte aligned.
    #[inline]
    pub fn top(&self) -> *mut u8 {
        // SAFETY: one-past-the-end of the allocation.
        unsafe { self.base.as_ptr().add(self.size) }
    }

    /// Whether the canary at the bottom of the stack is untouched.
    #[inline]
    pub fn intact(&self) -> bool {
        // SAFETY: base is valid and aligned for a u64 read.
        unsafe { (self.base.as_ptr() as *const u64).read_volatile() == CANARY }
    }

    fn layout(size: usize) -> Layout {
        // size is a non-zero multiple of ALIGN, which is a power of two.
        Layout::from_size_align(size, ALIGN).unwrap_or_else(|_| unreachable!())
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { alloc::dealloc(self.base.as_ptr(), Self::layout(self.size)) };
    }
}

impl core::fmt::Debug for Stack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stack")
            .field("base", &self.base)
            .field("size", &self.size)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
