use static_assertions::const_assert;

/// Number of hazard slots of a domain built with [`Config::default`].
pub const DEFAULT_CAPACITY: usize = 100;

const_assert!(DEFAULT_CAPACITY >= 1);

/// Construction parameters of a [`Domain`](crate::Domain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of threads that may own a hazard slot at the same time.
    pub capacity: usize,
}

impl Config {
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        let config = Self { capacity };
        config.validate();
        config
    }

    pub(crate) fn validate(&self) {
        assert!(self.capacity >= 1, "capacity must be greater than 0.");
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}
