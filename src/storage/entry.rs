//! Cache entries and expiration policies.

use std::time::{Duration, Instant};

/// How long a written value should live.
///
/// The policy is resolved to an absolute instant when the value is written,
/// so later changes to a shard's default never affect existing entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// Use the cache's default expiration.
    #[default]
    Default,
    /// The entry never expires.
    Never,
    /// The entry expires after the given duration.
    ///
    /// A zero duration behaves like [`Ttl::Default`].
    After(Duration),
}

impl Ttl {
    /// Resolves this policy to an absolute expiration instant.
    ///
    /// `default` is the owning shard's default TTL (`None` = never). A TTL too
    /// large to represent as an instant never expires.
    #[inline]
    pub fn resolve(self, default: Option<Duration>) -> Option<Instant> {
        let ttl = match self {
            Ttl::Never => None,
            Ttl::After(d) if !d.is_zero() => Some(d),
            Ttl::After(_) | Ttl::Default => default,
        };
        ttl.and_then(deadline)
    }
}

impl From<Duration> for Ttl {
    fn from(d: Duration) -> Self {
        Ttl::After(d)
    }
}

impl From<Option<Duration>> for Ttl {
    fn from(d: Option<Duration>) -> Self {
        d.map(Ttl::After).unwrap_or(Ttl::Never)
    }
}

/// The instant `ttl` from now, or `None` if it overflows.
#[inline]
fn deadline(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<V> {
    /// The actual value stored
    pub value: V,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    /// Creates a new entry without expiry.
    pub fn new(value: V) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates a new entry expiring at the given instant.
    pub fn with_expiration(value: V, expires_at: Option<Instant>) -> Self {
        Self { value, expires_at }
    }

    /// Creates a new entry with TTL.
    ///
    /// A TTL past the representable range of [`Instant`] never expires.
    pub fn with_ttl(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: deadline(ttl),
        }
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Checks if this entry had expired at `now`.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }

    /// Returns the remaining time to live, or None if no expiry.
    pub fn ttl(&self) -> Option<Duration> {
        self.expires_at
            .map(|exp| exp.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_expires() {
        let entry = Entry::new(1);
        assert!(!entry.is_expired());
        assert_eq!(entry.ttl(), None);
    }

    #[test]
    fn test_expired_at_boundary() {
        let now = Instant::now();
        let entry = Entry::with_expiration("v", Some(now));
        assert!(entry.is_expired_at(now));
        assert!(!entry.is_expired_at(now - Duration::from_millis(1)));
    }

    #[test]
    fn test_with_ttl() {
        let entry = Entry::with_ttl("v", Duration::from_secs(60));
        assert!(!entry.is_expired());
        let ttl = entry.ttl().unwrap();
        assert!(ttl > Duration::from_secs(59) && ttl <= Duration::from_secs(60));
    }

    #[test]
    fn test_ttl_resolution() {
        let default = Some(Duration::from_secs(10));

        assert_eq!(Ttl::Never.resolve(default), None);
        assert_eq!(Ttl::Default.resolve(None), None);
        assert!(Ttl::Default.resolve(default).is_some());

        let before = Instant::now();
        let at = Ttl::After(Duration::from_secs(5)).resolve(None).unwrap();
        assert!(at >= before + Duration::from_secs(5));
        assert!(at < before + Duration::from_secs(10));

        // Zero falls back to the default.
        let at = Ttl::After(Duration::ZERO).resolve(default).unwrap();
        assert!(at >= before + Duration::from_secs(10));
        assert_eq!(Ttl::After(Duration::ZERO).resolve(None), None);
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        assert_eq!(Ttl::After(Duration::MAX).resolve(None), None);
        assert_eq!(Ttl::Default.resolve(Some(Duration::MAX)), None);

        let entry = Entry::with_ttl(7u8, Duration::MAX);
        assert_eq!(entry.expires_at, None);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_ttl_from() {
        assert_eq!(Ttl::from(Duration::from_secs(1)), Ttl::After(Duration::from_secs(1)));
        assert_eq!(Ttl::from(None), Ttl::Never);
    }
}
