use std::sync::Arc;

use crate::alloc::free;
use crate::config::Config;
use crate::error::Result;
use crate::hazard::{HazardPointer, HazardRegistry};
use crate::retired::{Reservation, RetiredList};
use crate::thread;

/// A reclamation context: one hazard slot table and one list of retired objects.
///
/// Objects retired to a domain are only checked against the hazards of the same domain,
/// so every data structure sharing memory must use a single domain.
pub struct Domain {
    registry: Arc<HazardRegistry>,
    retireds: RetiredList,
}

impl Domain {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_config(Config::with_capacity(capacity))
    }

    pub fn with_config(config: Config) -> Self {
        config.validate();
        log::debug!("creating domain with {} hazard slots", config.capacity);
        Self {
            registry: Arc::new(HazardRegistry::new(config.capacity)),
            retireds: RetiredList::new(),
        }
    }

    /// Returns the calling thread's hazard pointer, claiming a slot on the first call.
    ///
    /// The slot stays owned by the thread until it exits. Fails with
    /// [`Error::ResourceExhausted`](crate::Error::ResourceExhausted) if every slot is owned by
    /// another live thread.
    #[inline]
    pub fn hazard_pointer(&self) -> Result<HazardPointer<'_>> {
        let index = thread::acquire(&self.registry)?;
        Ok(HazardPointer::new(self.registry.slot(index)))
    }

    /// Returns `true` if some thread currently publishes `ptr`.
    #[inline]
    pub fn is_protected<T>(&self, ptr: *mut T) -> bool {
        self.registry.is_protected(ptr as *mut u8)
    }

    /// Defers dropping `ptr` until a sweep finds it unprotected.
    ///
    /// On failure nothing is retired and the caller still owns `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Box::into_raw` or [`try_alloc`](crate::try_alloc), must be
    /// unreachable for threads that have not protected it yet, and must not be retired twice.
    #[inline]
    pub unsafe fn retire<T>(&self, ptr: *mut T) -> Result<()> {
        let reservation = self.reserve()?;
        self.retire_reserved(reservation, ptr);
        Ok(())
    }

    /// Allocates the record for a later [`retire_reserved`](Self::retire_reserved).
    ///
    /// Reserve before unlinking an object, so the unlinked object can always be retired.
    pub fn reserve(&self) -> Result<Reservation> {
        RetiredList::reserve().map_err(|err| {
            log::error!("could not reserve a retirement record: {}", err);
            err
        })
    }

    /// Like [`retire`](Self::retire), but uses memory reserved earlier and cannot fail.
    ///
    /// # Safety
    ///
    /// Same as [`retire`](Self::retire).
    #[inline]
    pub unsafe fn retire_reserved<T>(&self, reservation: Reservation, ptr: *mut T) {
        self.retireds.push_reserved(reservation, ptr as *mut u8, free::<T>);
    }

    /// Frees every retired object that no hazard protects and returns how many were freed.
    ///
    /// Protected objects stay pending for a later sweep.
    pub fn sweep(&self) -> usize {
        let freed = self.retireds.sweep(|| self.registry.guarded_ptrs());
        if freed > 0 {
            log::trace!("sweep freed {} objects, {} pending", freed, self.num_garbages());
        }
        freed
    }

    /// Number of retired objects not freed yet.
    pub fn num_garbages(&self) -> usize {
        self.retireds.len()
    }

    pub fn claimed_slots(&self) -> usize {
        self.registry.claimed()
    }

    pub fn capacity(&self) -> usize {
        self.registry.capacity()
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Domain {
    fn drop(&mut self) {
        log::debug!(
            "dropping domain, freeing {} pending objects",
            self.num_garbages()
        );
        // Nothing can borrow the domain anymore, so pending objects are unobserved.
        self.registry.close();
    }
}
