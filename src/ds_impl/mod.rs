pub mod atomic_arc;
pub mod concurrent_stack;
pub mod hp;

pub use self::atomic_arc::RefCountedStack;
pub use self::concurrent_stack::ConcurrentStack;
pub use self::hp::HazardPointerStack;
