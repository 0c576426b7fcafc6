use core::cell::RefCell;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::hazard::{HazardRegistry, UNOWNED};

static NEXT_TAG: AtomicU64 = AtomicU64::new(UNOWNED + 1);

/// A slot owned by the current thread. Releasing happens on drop, i.e. at thread exit.
struct OwnedSlot {
    registry: Arc<HazardRegistry>,
    index: usize,
}

impl Drop for OwnedSlot {
    fn drop(&mut self) {
        log::trace!("releasing hazard slot {}", self.index);
        self.registry.release(self.index);
    }
}

/// Per-thread bookkeeping: an identity and the slots owned in each live domain.
struct Local {
    tag: u64,
    slots: RefCell<Vec<OwnedSlot>>,
}

impl Local {
    fn new() -> Self {
        Self {
            tag: NEXT_TAG.fetch_add(1, Ordering::Relaxed),
            slots: RefCell::new(Vec::new()),
        }
    }

    fn slot_index(&self, registry: &Arc<HazardRegistry>) -> Result<usize> {
        let mut slots = self.slots.borrow_mut();
        if let Some(owned) = slots.iter().find(|owned| Arc::ptr_eq(&owned.registry, registry)) {
            return Ok(owned.index);
        }

        // Slots of dropped domains are only reachable from here.
        slots.retain(|owned| !owned.registry.is_closed());

        let index = registry.claim(self.tag).map_err(|err| {
            log::warn!("thread {} could not claim a hazard slot: {}", self.tag, err);
            err
        })?;
        log::trace!("thread {} claimed hazard slot {}", self.tag, index);
        slots.push(OwnedSlot {
            registry: Arc::clone(registry),
            index,
        });
        Ok(index)
    }
}

thread_local! {
    static LOCAL: Local = Local::new();
}

/// Returns the index of the current thread's slot in `registry`, claiming one on first use.
///
/// Fails with [`Error::ThreadExiting`] when called from a thread-local destructor that runs
/// after the current thread's slots were released.
pub(crate) fn acquire(registry: &Arc<HazardRegistry>) -> Result<usize> {
    LOCAL
        .try_with(|local| local.slot_index(registry))
        .unwrap_or(Err(Error::ThreadExiting))
}

#[cfg(test)]
mod tests {
    use super::acquire;
    use crate::hazard::HazardRegistry;
    use crate::{Error, Result};
    use crossbeam_utils::thread;
    use std::cell::RefCell;
    use std::sync::{Arc, Barrier, Mutex};

    #[test]
    fn idempotent_per_thread() {
        let registry = Arc::new(HazardRegistry::new(4));
        let first = acquire(&registry).unwrap();
        assert_eq!(acquire(&registry).unwrap(), first);
        assert_eq!(registry.claimed(), 1);
    }

    #[test]
    fn released_at_thread_exit() {
        let registry = &Arc::new(HazardRegistry::new(4));
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(move |_| acquire(registry).unwrap());
            }
        })
        .unwrap();
        assert_eq!(registry.claimed(), 0);
    }

    #[test]
    fn exhausted() {
        const CAPACITY: usize = 2;
        let registry = &Arc::new(HazardRegistry::new(CAPACITY));
        let barrier = &Barrier::new(CAPACITY + 1);

        let results = thread::scope(|s| {
            let handles: Vec<_> = (0..CAPACITY + 1)
                .map(|_| {
                    s.spawn(move |_| {
                        let result = acquire(registry);
                        // Keep every slot owned until all threads tried.
                        barrier.wait();
                        result
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        })
        .unwrap();

        let failures = results
            .iter()
            .filter(|r| **r == Err(Error::ResourceExhausted { capacity: CAPACITY }))
            .count();
        assert_eq!(failures, 1);
        assert_eq!(registry.claimed(), 0);
    }

    #[test]
    fn acquire_from_thread_local_destructor() {
        static OUTCOME: Mutex<Option<Result<usize>>> = Mutex::new(None);

        struct LateUser(Arc<HazardRegistry>);

        impl Drop for LateUser {
            fn drop(&mut self) {
                *OUTCOME.lock().unwrap() = Some(acquire(&self.0));
            }
        }

        thread_local! {
            static LATE: RefCell<Option<LateUser>> = RefCell::new(None);
        }

        let registry = Arc::new(HazardRegistry::new(1));
        let late = Arc::clone(&registry);
        std::thread::spawn(move || {
            // Registered before the slot bookkeeping, so it is destroyed after it.
            LATE.with(|cell| *cell.borrow_mut() = Some(LateUser(Arc::clone(&late))));
            acquire(&late).unwrap();
        })
        .join()
        .unwrap();

        let outcome = OUTCOME.lock().unwrap().take();
        assert!(
            matches!(outcome, Some(Ok(_)) | Some(Err(Error::ThreadExiting))),
            "{:?}",
            outcome
        );
        assert_eq!(registry.claimed(), 0);
    }
}
