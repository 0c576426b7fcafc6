use hp_reclaim::Result;

pub trait ConcurrentStack<T> {
    fn push(&self, value: T) -> Result<()>;
    fn pop(&self) -> Result<Option<T>>;
    fn is_empty(&self) -> bool;
}
