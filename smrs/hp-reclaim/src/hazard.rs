use core::marker::PhantomData;
use core::ptr::null_mut;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};
use std::sync::atomic::fence;

use crossbeam_utils::CachePadded;
use rustc_hash::FxHashSet;

use crate::error::{Error, Result};

/// Owner tag of a slot which no thread currently holds.
pub(crate) const UNOWNED: u64 = 0;

pub(crate) struct HazardSlot {
    owner: AtomicU64,
    hazard: AtomicPtr<u8>,
}

impl HazardSlot {
    fn new() -> Self {
        Self {
            owner: AtomicU64::new(UNOWNED),
            hazard: AtomicPtr::new(null_mut()),
        }
    }

    #[inline]
    fn try_claim(&self, tag: u64) -> bool {
        self.owner.load(Ordering::Relaxed) == UNOWNED
            && self
                .owner
                .compare_exchange(UNOWNED, tag, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
    }

    fn release(&self) {
        self.hazard.store(null_mut(), Ordering::Release);
        self.owner.store(UNOWNED, Ordering::Release);
    }
}

/// A fixed table of hazard slots, at most one per thread.
pub(crate) struct HazardRegistry {
    slots: Box<[CachePadded<HazardSlot>]>,
    /// Set when the owning domain is gone; thread-local entries pointing here are stale.
    closed: AtomicBool,
}

impl HazardRegistry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity)
                .map(|_| CachePadded::new(HazardSlot::new()))
                .collect(),
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claims the first unowned slot for the thread identified by `tag`.
    pub(crate) fn claim(&self, tag: u64) -> Result<usize> {
        debug_assert_ne!(tag, UNOWNED);
        self.slots
            .iter()
            .position(|slot| slot.try_claim(tag))
            .ok_or(Error::ResourceExhausted {
                capacity: self.capacity(),
            })
    }

    pub(crate) fn release(&self, index: usize) {
        self.slots[index].release();
    }

    #[inline]
    pub(crate) fn slot(&self, index: usize) -> &HazardSlot {
        &self.slots[index]
    }

    /// Returns `true` if any slot currently publishes `ptr`.
    pub(crate) fn is_protected(&self, ptr: *mut u8) -> bool {
        if ptr.is_null() {
            return false;
        }
        fence(Ordering::SeqCst);
        self.slots
            .iter()
            .any(|slot| slot.hazard.load(Ordering::Acquire) == ptr)
    }

    /// Snapshots every published hazard.
    pub(crate) fn guarded_ptrs(&self) -> FxHashSet<*mut u8> {
        fence(Ordering::SeqCst);
        self.slots
            .iter()
            .map(|slot| slot.hazard.load(Ordering::Acquire))
            .filter(|ptr| !ptr.is_null())
            .collect()
    }

    pub(crate) fn claimed(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.owner.load(Ordering::Acquire) != UNOWNED)
            .count()
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// The calling thread's hazard slot in a domain.
///
/// Obtained from [`Domain::hazard_pointer`](crate::Domain::hazard_pointer). The slot itself
/// stays claimed until the thread exits; dropping this handle only clears the published
/// address.
pub struct HazardPointer<'domain> {
    slot: &'domain HazardSlot,
    _marker: PhantomData<*const ()>,
}

impl<'domain> HazardPointer<'domain> {
    pub(crate) fn new(slot: &'domain HazardSlot) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    /// Publishes `ptr`. The store is globally visible once this returns.
    #[inline]
    pub fn protect<T>(&self, ptr: *mut T) {
        self.slot.hazard.store(ptr as *mut u8, Ordering::Release);
        fence(Ordering::SeqCst);
    }

    /// Protects the current value of `link` and returns it.
    ///
    /// Republishes until the link is observed unchanged after the publication, so the
    /// returned pointer was reachable from `link` while already protected.
    #[inline]
    pub fn protect_link<T>(&self, link: &AtomicPtr<T>) -> *mut T {
        let mut ptr = link.load(Ordering::Relaxed);
        loop {
            self.protect(ptr);
            let new_ptr = link.load(Ordering::Acquire);
            if ptr == new_ptr {
                return ptr;
            }
            ptr = new_ptr;
        }
    }

    #[inline]
    pub fn reset(&self) {
        self.slot.hazard.store(null_mut(), Ordering::Release);
    }
}

impl<'domain> Drop for HazardPointer<'domain> {
    fn drop(&mut self) {
        self.reset();
    }
}
