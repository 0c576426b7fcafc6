use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Every hazard slot of the domain is owned by some live thread.
    #[error("no hazard slot available: all {capacity} slots are claimed")]
    ResourceExhausted { capacity: usize },
    /// The global allocator could not serve a node or a retirement record.
    #[error("allocation of {size} bytes failed")]
    AllocationFailure { size: usize },
    /// The calling thread's slot bookkeeping was already destroyed during thread exit.
    #[error("the current thread is exiting and can no longer own a hazard slot")]
    ThreadExiting,
}

pub type Result<T> = std::result::Result<T, Error>;
