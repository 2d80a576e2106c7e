use crate::error::RingError;

/// Configuration for a [`crate::Ring`].
///
/// The only meaningful parameter is the capacity in bytes, which must be a
/// power of two so that `capacity - 1` can be used as a masking bitmask
/// instead of a modulo on the hot path.
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    capacity: usize,
    enable_metrics: bool,
}

impl RingConfig {
    /// Creates a configuration with the given capacity, in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::InvalidArgument`] if `capacity` is zero or not a
    /// power of two.
    pub fn new(capacity: usize, enable_metrics: bool) -> Result<Self, RingError> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(RingError::InvalidArgument {
                reason: "capacity must be a positive power of two",
            });
        }
        Ok(Self {
            capacity,
            enable_metrics,
        })
    }

    /// Returns the configured capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the bitmask used to translate a logical position to a
    /// physical index: `position & mask`.
    #[inline]
    #[must_use]
    pub const fn mask(&self) -> usize {
        self.capacity - 1
    }

    /// Returns whether metrics collection is enabled for rings built from
    /// this configuration.
    #[inline]
    #[must_use]
    pub const fn metrics_enabled(&self) -> bool {
        self.enable_metrics
    }
}

impl Default for RingConfig {
    /// 64 KiB capacity, metrics disabled.
    fn default() -> Self {
        Self {
            capacity: 1 << 16,
            enable_metrics: false,
        }
    }
}
