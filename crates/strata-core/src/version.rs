use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Next raw value handed out by [`VersionStamp::create`].
///
/// Zero is reserved for [`VersionStamp::default`].
static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// A logical clock value used to version project state.
///
/// Stamps are totally ordered and only meaningful within the current process: every call to
/// [`VersionStamp::create`] (or one of the `get_newer*` helpers) yields a value strictly greater
/// than every stamp handed out before it. The default stamp sorts below all created stamps and is
/// used to represent "never computed".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionStamp(u64);

impl VersionStamp {
    /// Returns a fresh stamp, newer than every stamp previously created in this process.
    pub fn create() -> Self {
        Self::next_after(0)
    }

    /// Returns a stamp strictly newer than `self`.
    #[must_use]
    pub fn get_newer(self) -> Self {
        Self::next_after(self.0)
    }

    /// Returns a stamp strictly newer than both `self` and `other`.
    #[must_use]
    pub fn get_newer_than(self, other: VersionStamp) -> Self {
        Self::next_after(self.0.max(other.0))
    }

    /// Returns `true` if `self` was created after `other`.
    pub fn is_newer_than(self, other: VersionStamp) -> bool {
        self > other
    }

    /// Returns `true` for the reserved "uncomputed" stamp.
    pub fn is_default(self) -> bool {
        self.0 == 0
    }

    pub fn to_raw(self) -> u64 {
        self.0
    }

    fn next_after(floor: u64) -> Self {
        let floor = floor.saturating_add(1);
        // Every stamp is minted from the global counter, so `floor` is normally already behind
        // it. Bumping the counter past `floor` keeps later `create()` calls ordered after us.
        let previous = match NEXT_VERSION.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
            Some(next.max(floor).saturating_add(1))
        }) {
            Ok(previous) | Err(previous) => previous,
        };
        Self(previous.max(floor))
    }
}

impl fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
