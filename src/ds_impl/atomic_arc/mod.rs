pub mod stack;

pub use self::stack::RefCountedStack;
