use crate::ds_impl::concurrent_stack::ConcurrentStack;
use arc_swap::{ArcSwapOption, Guard};
use crossbeam_utils::Backoff;
use hp_reclaim::Result;
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::Arc;

struct Node<T> {
    value: UnsafeCell<Option<T>>,
    next: ArcSwapOption<Node<T>>,
}

// `value` is written before the node is published and taken only by the thread whose CAS
// unlinked the node.
unsafe impl<T: Send> Send for Node<T> {}
unsafe impl<T: Send> Sync for Node<T> {}

impl<T> Node<T> {
    fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(Some(value)),
            next: ArcSwapOption::empty(),
        }
    }
}

#[inline]
fn as_ptr<T>(handle: &Option<Arc<T>>) -> *const T {
    handle.as_ref().map_or(ptr::null(), Arc::as_ptr)
}

/// Treiber's stack built on atomically swappable `Arc`s.
///
/// A node lives as long as a handle to it: the head, the `next` of the node above it, or a
/// snapshot held by a thread in the middle of an operation. Popping clears the popped node's
/// `next`, so a stale snapshot keeps only that node alive and not the rest of the stack.
pub struct RefCountedStack<T> {
    head: ArcSwapOption<Node<T>>,
}

impl<T> RefCountedStack<T> {
    pub fn new() -> Self {
        Self {
            head: ArcSwapOption::empty(),
        }
    }

    pub fn push(&self, value: T) {
        let node = Arc::new(Node::new(value));
        let backoff = Backoff::new();
        let mut head = self.head.load_full();
        loop {
            node.next.store(head.clone());
            let prev = self.head.compare_and_swap(&head, Some(Arc::clone(&node)));
            if ptr::eq(as_ptr(&prev), as_ptr(&head)) {
                return;
            }
            head = Guard::into_inner(prev);
            backoff.spin();
        }
    }

    pub fn pop(&self) -> Option<T> {
        let backoff = Backoff::new();
        let mut head = self.head.load_full();
        loop {
            let node = head.as_ref()?;
            // Read at the attempt: a racing pop may already have cleared it.
            let next = node.next.load_full();
            let prev = self.head.compare_and_swap(node, next);
            if ptr::eq(as_ptr(&prev), Arc::as_ptr(node)) {
                node.next.store(None);
                return unsafe { (*node.value.get()).take() };
            }
            head = Guard::into_inner(prev);
            backoff.spin();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load().is_none()
    }
}

impl<T> Default for RefCountedStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for RefCountedStack<T> {
    fn drop(&mut self) {
        // Manual drop procedure to prevent a stack overflow.
        while self.pop().is_some() {}
    }
}

impl<T> ConcurrentStack<T> for RefCountedStack<T> {
    #[inline(always)]
    fn push(&self, value: T) -> Result<()> {
        self.push(value);
        Ok(())
    }

    #[inline(always)]
    fn pop(&self) -> Result<Option<T>> {
        Ok(self.pop())
    }

    #[inline(always)]
    fn is_empty(&self) -> bool {
        self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::RefCountedStack;
    use crate::ds_impl::concurrent_stack::tests::{self, init_logger};
    use std::sync::Arc;

    #[test]
    fn lifo() {
        tests::lifo(&RefCountedStack::new());
    }

    #[test]
    fn producer_then_consumer() {
        tests::producer_then_consumer(&RefCountedStack::new());
    }

    #[test]
    fn smoke() {
        init_logger();
        tests::smoke(&RefCountedStack::new());
    }

    #[test]
    fn mixed() {
        init_logger();
        tests::mixed(&RefCountedStack::new());
    }

    #[test]
    fn popped_value_is_released() {
        let stack = RefCountedStack::new();
        let payload = Arc::new(7);
        stack.push(Arc::clone(&payload));
        stack.push(Arc::new(8));

        assert_eq!(stack.pop().as_deref(), Some(&8));
        let popped = stack.pop().unwrap();
        assert!(Arc::ptr_eq(&popped, &payload));
        drop(popped);
        assert_eq!(Arc::strong_count(&payload), 1);
        assert!(stack.pop().is_none());
    }

    #[test]
    fn drop_long_stack() {
        let payload = Arc::new(());
        {
            let stack = RefCountedStack::new();
            for _ in 0..100_000 {
                stack.push(Arc::clone(&payload));
            }
        }
        assert_eq!(Arc::strong_count(&payload), 1);
    }
}
