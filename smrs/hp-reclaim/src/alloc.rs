use std::alloc::{alloc, Layout};
use std::mem::size_of;
use std::ptr::{self, NonNull};

use crate::error::{Error, Result};

/// Byte pattern written over freed objects when the `poison` feature is enabled.
pub const POISON_BYTE: u8 = 0xDE;

const POISON_WORD: usize = usize::from_ne_bytes([POISON_BYTE; size_of::<usize>()]);

/// Moves `value` to the heap, reporting allocator failure instead of aborting.
///
/// The returned pointer has the layout of a `Box<T>` and is released by [`free`].
pub fn try_alloc<T>(value: T) -> Result<NonNull<T>> {
    let ptr = try_alloc_raw::<T>()?;
    unsafe { ptr.as_ptr().write(value) };
    Ok(ptr)
}

/// Allocates uninitialized memory for one `T` with the layout of a `Box<T>`.
pub fn try_alloc_raw<T>() -> Result<NonNull<T>> {
    let layout = Layout::new::<T>();
    if layout.size() == 0 {
        return Ok(NonNull::dangling());
    }
    NonNull::new(unsafe { alloc(layout) } as *mut T).ok_or(Error::AllocationFailure {
        size: layout.size(),
    })
}

cfg_if! {
    if #[cfg(feature = "poison")] {
        /// Drops the `T` behind `ptr`, poisons its bytes and quarantines the memory.
        ///
        /// The allocation is never returned to the allocator, so a later access through a
        /// stale pointer deterministically observes the poison pattern.
        pub unsafe fn free<T>(ptr: *mut u8) {
            let ptr = ptr as *mut T;
            ptr::drop_in_place(ptr);
            ptr::write_bytes(ptr as *mut u8, POISON_BYTE, size_of::<T>());
        }
    } else {
        /// Drops and deallocates an object created by [`try_alloc`] or `Box::new`.
        pub unsafe fn free<T>(ptr: *mut u8) {
            let ptr = ptr as *mut T;
            drop(Box::from_raw(ptr));
        }
    }
}

/// Panics if the leading word of `*ptr` is the poison pattern.
///
/// Only active with the `poison` feature; objects checked this way must start with a word
/// that is never all-poison while alive (e.g. a pointer field).
#[inline]
pub unsafe fn assert_live<T>(ptr: *const T) {
    if cfg!(feature = "poison") && size_of::<T>() >= size_of::<usize>() {
        let word = ptr::read_unaligned(ptr as *const usize);
        assert_ne!(word, POISON_WORD, "observed a freed object at {:p}", ptr);
    }
}
