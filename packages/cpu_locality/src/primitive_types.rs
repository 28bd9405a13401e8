use derive_more::derive::Display;

/// Identifies a specific logical processor by the numeric ID the operating system assigns to it.
///
/// This is a *system ID*: it stays the same no matter how a [`Platform`][crate::Platform]
/// working set is filtered. Compact indexes into a platform's working set are plain `usize`
/// values and are never interchangeable with this type.
///
/// The values are not guaranteed to be sequential/contiguous or to start from zero.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("{_0}")]
pub struct CpuId(i32);

impl CpuId {
    /// The processor ID that identifies no processor.
    pub const INVALID: Self = Self(-1);

    /// Wraps a raw operating system processor ID. Negative values all mean [`Self::INVALID`].
    #[must_use]
    pub const fn new(id: i32) -> Self {
        if id < 0 { Self::INVALID } else { Self(id) }
    }

    /// The raw operating system processor ID, `-1` for [`Self::INVALID`].
    #[cfg_attr(test, mutants::skip)] // Trivial getter.
    #[inline]
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }

    /// Whether this refers to an actual processor.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl Default for CpuId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl From<u32> for CpuId {
    fn from(value: u32) -> Self {
        Self::new(i32::try_from(value).unwrap_or(-1))
    }
}

/// Identifies a specific NUMA node by the numeric ID the operating system assigns to it.
///
/// Where a topology has no NUMA information, groups carry [`NumaId::INVALID`].
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("{_0}")]
pub struct NumaId(i32);

impl NumaId {
    /// The NUMA node ID that identifies no NUMA node (unknown or not applicable).
    pub const INVALID: Self = Self(-1);

    /// Wraps a raw operating system NUMA node ID. Negative values all mean [`Self::INVALID`].
    #[must_use]
    pub const fn new(id: i32) -> Self {
        if id < 0 { Self::INVALID } else { Self(id) }
    }

    /// The raw operating system NUMA node ID, `-1` for [`Self::INVALID`].
    #[cfg_attr(test, mutants::skip)] // Trivial getter.
    #[inline]
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }

    /// Whether this refers to an actual NUMA node.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl Default for NumaId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl From<u32> for NumaId {
    fn from(value: u32) -> Self {
        Self::new(i32::try_from(value).unwrap_or(-1))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(CpuId: Send, Sync, Copy);
    assert_impl_all!(NumaId: Send, Sync, Copy);

    // The two kinds of system ID must never be mixed up.
    assert_not_impl_any!(CpuId: From<NumaId>, PartialEq<NumaId>);
    assert_not_impl_any!(NumaId: From<CpuId>, PartialEq<CpuId>);

    #[test]
    fn negative_is_invalid() {
        assert_eq!(CpuId::new(-5), CpuId::INVALID);
        assert_eq!(NumaId::new(-1), NumaId::INVALID);
        assert!(!CpuId::INVALID.is_valid());
        assert!(!NumaId::default().is_valid());
    }

    #[test]
    fn valid_round_trips_raw_value() {
        let cpu = CpuId::new(17);
        assert!(cpu.is_valid());
        assert_eq!(cpu.get(), 17);
        assert_eq!(cpu.to_string(), "17");

        assert_eq!(NumaId::from(3_u32).get(), 3);
        assert_eq!(NumaId::INVALID.to_string(), "-1");
    }

    #[test]
    fn out_of_range_u32_is_invalid() {
        assert_eq!(CpuId::from(u32::MAX), CpuId::INVALID);
    }
}
