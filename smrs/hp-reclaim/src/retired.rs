use std::{
    alloc::{dealloc, Layout},
    mem::forget,
    ptr::{null_mut, NonNull},
    sync::atomic::{AtomicPtr, AtomicUsize, Ordering},
};

use crossbeam_utils::{Backoff, CachePadded};
use rustc_hash::FxHashSet;

use crate::alloc::try_alloc_raw;
use crate::error::Result;

/// A type-erased destructor call: `task` releases the object at `data`.
///
/// It has to be consumed by [`Deferred::execute`]; dropping it instead panics, since the object
/// would leak silently.
#[derive(Debug)]
pub(crate) struct Deferred {
    data: *mut u8,
    task: unsafe fn(*mut u8),
}

impl Deferred {
    #[inline]
    #[must_use]
    pub fn new(data: *mut u8, task: unsafe fn(*mut u8)) -> Self {
        Self { data, task }
    }

    /// Releases the object.
    #[inline]
    pub unsafe fn execute(self) {
        (self.task)(self.data);
        forget(self);
    }

    /// Address of the object, as published in hazard slots.
    #[inline]
    pub fn data(&self) -> *mut u8 {
        self.data
    }
}

impl Drop for Deferred {
    fn drop(&mut self) {
        panic!("retired object at {:p} was never released", self.data);
    }
}

// Any thread's sweep may release the object.
unsafe impl Send for Deferred {}

/// A retired object waiting until no hazard points to it.
struct Retired {
    def: Deferred,
    next: *mut Retired,
}

/// Memory for one retirement record, allocated before the object it will hold is unlinked.
///
/// Dropping an unused reservation returns the memory.
pub struct Reservation(NonNull<Retired>);

impl Drop for Reservation {
    fn drop(&mut self) {
        unsafe { dealloc(self.0.as_ptr() as *mut u8, Layout::new::<Retired>()) };
    }
}

/// A lock-free list of [`Retired`] records.
///
/// Producers insert with a CAS loop; a sweep detaches the whole list with one swap, so
/// concurrent sweeps never see the same record.
pub(crate) struct RetiredList {
    head: CachePadded<AtomicPtr<Retired>>,
    len: CachePadded<AtomicUsize>,
}

impl RetiredList {
    pub(crate) fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicPtr::new(null_mut())),
            len: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn reserve() -> Result<Reservation> {
        Ok(Reservation(try_alloc_raw::<Retired>()?))
    }

    /// Records `task(data)` for a later sweep.
    ///
    /// The record is allocated before the task is built, so on failure nothing is retired and
    /// `data` stays with the caller.
    pub(crate) fn push(&self, data: *mut u8, task: unsafe fn(*mut u8)) -> Result<()> {
        let reservation = Self::reserve()?;
        self.push_reserved(reservation, data, task);
        Ok(())
    }

    /// Records `task(data)` in memory reserved earlier. Never fails.
    pub(crate) fn push_reserved(
        &self,
        reservation: Reservation,
        data: *mut u8,
        task: unsafe fn(*mut u8),
    ) {
        let record = reservation.0.as_ptr();
        forget(reservation);
        unsafe {
            record.write(Retired {
                def: Deferred::new(data, task),
                next: null_mut(),
            })
        };
        self.len.fetch_add(1, Ordering::AcqRel);
        self.push_record(record);
    }

    fn push_record(&self, record: *mut Retired) {
        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*record).next = head };
            match self
                .head
                .compare_exchange_weak(head, record, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => {
                    head = current;
                    backoff.spin();
                }
            }
        }
    }

    /// Detaches every record, executes the ones whose data is not in `guarded` and puts the
    /// others back. Returns the number of executed tasks.
    pub(crate) fn sweep<F>(&self, guarded: F) -> usize
    where
        F: FnOnce() -> FxHashSet<*mut u8>,
    {
        let mut curr = self.head.swap(null_mut(), Ordering::Acquire);
        if curr.is_null() {
            return 0;
        }

        let guarded = guarded();
        let mut freed = 0;
        while !curr.is_null() {
            let next = unsafe { (*curr).next };
            if guarded.contains(&unsafe { &*curr }.def.data()) {
                self.push_record(curr);
            } else {
                let record = unsafe { Box::from_raw(curr) };
                let Retired { def, .. } = *record;
                unsafe { def.execute() };
                freed += 1;
            }
            curr = next;
        }
        self.len.fetch_sub(freed, Ordering::AcqRel);
        freed
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }
}

impl Drop for RetiredList {
    fn drop(&mut self) {
        let mut curr = *self.head.get_mut();
        while !curr.is_null() {
            let record = unsafe { Box::from_raw(curr) };
            let Retired { def, next } = *record;
            unsafe { def.execute() };
            curr = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Reservation, RetiredList};
    use crate::alloc::free;
    use crossbeam_utils::thread;
    use rustc_hash::FxHashSet;

    #[test]
    fn sweep_keeps_guarded() {
        let list = RetiredList::new();
        let a = Box::into_raw(Box::new(1u64));
        let b = Box::into_raw(Box::new(2u64));
        list.push(a as *mut u8, free::<u64>).unwrap();
        list.push(b as *mut u8, free::<u64>).unwrap();
        assert_eq!(list.len(), 2);

        let freed = list.sweep(|| [a as *mut u8].into_iter().collect());
        assert_eq!(freed, 1);
        assert_eq!(list.len(), 1);

        assert_eq!(list.sweep(FxHashSet::default), 1);
        assert_eq!(list.len(), 0);
        assert_eq!(list.sweep(FxHashSet::default), 0);
    }

    #[test]
    fn reserved_push_and_unused_reservation() {
        let list = RetiredList::new();
        let unused: Reservation = RetiredList::reserve().unwrap();
        drop(unused);
        assert_eq!(list.len(), 0);

        let reservation = RetiredList::reserve().unwrap();
        let ptr = Box::into_raw(Box::new(String::from("retired")));
        list.push_reserved(reservation, ptr as *mut u8, free::<String>);
        assert_eq!(list.len(), 1);
        assert_eq!(list.sweep(|| [ptr as *mut u8].into_iter().collect()), 0);
        assert_eq!(list.sweep(FxHashSet::default), 1);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn concurrent_push_and_sweep() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 1000;
        let list = &RetiredList::new();

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(move |_| {
                    for i in 0..PER_THREAD {
                        let ptr = Box::into_raw(Box::new(i));
                        list.push(ptr as *mut u8, free::<usize>).unwrap();
                        if i % 64 == 0 {
                            list.sweep(FxHashSet::default);
                        }
                    }
                });
            }
        })
        .unwrap();

        list.sweep(FxHashSet::default);
        assert_eq!(list.len(), 0);
    }
}
