use crate::ds_impl::concurrent_stack::ConcurrentStack;
use crossbeam_utils::Backoff;
use hp_reclaim::{assert_live, default_domain, free, try_alloc, Domain, Result};
use std::mem::ManuallyDrop;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicPtr, Ordering};

// `next` comes first so a freed node is recognizable by its leading word.
#[repr(C)]
struct Node<T> {
    next: *mut Node<T>,
    value: ManuallyDrop<T>,
}

/// Treiber's stack whose popped nodes are protected by hazard pointers.
///
/// Every node reachable from `head` is owned by the stack. A popped node is either freed at
/// once or retired to the domain, whichever applies when the popping thread checks the
/// hazards of the other threads.
pub struct HazardPointerStack<'domain, T> {
    head: AtomicPtr<Node<T>>,
    domain: &'domain Domain,
}

unsafe impl<'domain, T: Send> Send for HazardPointerStack<'domain, T> {}
unsafe impl<'domain, T: Send> Sync for HazardPointerStack<'domain, T> {}

impl<T> HazardPointerStack<'static, T> {
    /// Creates an empty stack reclaiming through the process-wide default domain.
    pub fn new() -> Self {
        Self::with_domain(default_domain())
    }
}

impl<T> Default for HazardPointerStack<'static, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'domain, T> HazardPointerStack<'domain, T> {
    pub fn with_domain(domain: &'domain Domain) -> Self {
        Self {
            head: AtomicPtr::new(null_mut()),
            domain,
        }
    }

    pub fn domain(&self) -> &'domain Domain {
        self.domain
    }

    pub fn push(&self, value: T) -> Result<()> {
        let node = try_alloc(Node {
            next: null_mut(),
            value: ManuallyDrop::new(value),
        })?
        .as_ptr();

        // The node is private until the CAS below publishes it.
        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*node).next = head };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return Ok(()),
                Err(current) => {
                    head = current;
                    backoff.spin();
                }
            }
        }
    }

    /// Pops the top value, or returns `Ok(None)` if the stack is empty.
    ///
    /// Fails if this is the calling thread's first pop in the stack's domain and the domain
    /// has no free hazard slot, or if the retirement record cannot be allocated. Either way the
    /// stack is left unchanged.
    pub fn pop(&self) -> Result<Option<T>> {
        let hazard = self.domain.hazard_pointer()?;
        let backoff = Backoff::new();
        let mut spare = None;
        let (node, reservation) = loop {
            let head = hazard.protect_link(&self.head);
            if head.is_null() {
                return Ok(None);
            }
            unsafe { assert_live(head) };

            // Once `head` is unlinked it may have to be retired, which must not fail.
            let reservation = match spare.take() {
                Some(reservation) => reservation,
                None => self.domain.reserve()?,
            };

            let next = unsafe { (*head).next };
            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break (head, reservation);
            }
            spare = Some(reservation);
            backoff.spin();
        };
        drop(hazard);

        // Only the thread whose CAS unlinked `node` reaches here, so moving out is exclusive.
        let value = unsafe { ManuallyDrop::take(&mut (*node).value) };

        // Our own hazard is cleared, so this only sees threads that raced on `node`.
        if self.domain.is_protected(node) {
            log::trace!("popped node {:p} is still protected, retiring it", node);
            unsafe { self.domain.retire_reserved(reservation, node) };
        } else {
            drop(reservation);
            unsafe { free::<Node<T>>(node as *mut u8) };
        }

        self.domain.sweep();
        Ok(Some(value))
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl<'domain, T> Drop for HazardPointerStack<'domain, T> {
    fn drop(&mut self) {
        let mut curr = *self.head.get_mut();
        while !curr.is_null() {
            let mut node = unsafe { Box::from_raw(curr) };
            unsafe { ManuallyDrop::drop(&mut node.value) };
            curr = node.next;
        }
    }
}

impl<'domain, T> ConcurrentStack<T> for HazardPointerStack<'domain, T> {
    #[inline(always)]
    fn push(&self, value: T) -> Result<()> {
        self.push(value)
    }

    #[inline(always)]
    fn pop(&self) -> Result<Option<T>> {
        self.pop()
    }

    #[inline(always)]
    fn is_empty(&self) -> bool {
        self.is_empty()
    }
}
