//! Strong type definitions for filer sync.
//!
//! Offsets, peer addresses and store identities are newtypes so they cannot
//! be mixed up at call sites.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// An origin timestamp in nanoseconds since the Unix epoch.
///
/// Each filer stamps its local mutations with a strictly increasing `TsNs`,
/// which doubles as the offset a subscriber resumes from. Timestamps from
/// different filers are not comparable in any causal sense.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TsNs(pub i64);

impl TsNs {
    /// The Unix epoch.
    pub const ZERO: Self = Self(0);

    /// Create from raw nanoseconds.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Get the raw nanoseconds.
    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self(i64::try_from(nanos).unwrap_or(i64::MAX))
    }

    /// This timestamp moved back by `window`, saturating at zero.
    pub fn saturating_sub(&self, window: Duration) -> Self {
        let window = i64::try_from(window.as_nanos()).unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(window).max(0))
    }

    /// Big-endian encoding, used for durable offset records.
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Parse the big-endian encoding produced by [`TsNs::to_be_bytes`].
    pub fn from_be_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 8] = bytes.try_into().ok()?;
        Some(Self(i64::from_be_bytes(arr)))
    }
}

impl fmt::Debug for TsNs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TsNs({})", self.0)
    }
}

impl fmt::Display for TsNs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TsNs {
    fn from(nanos: i64) -> Self {
        Self(nanos)
    }
}

/// The network address of a filer, e.g. `"10.0.0.4:8888"`.
///
/// Used both to dial a peer and as the key of its durable offset record.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    /// Create from any string-like address.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get the address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerAddress({})", self.0)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PeerAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque identity of the storage backing a filer.
///
/// Two filers reporting the same signature share one backing store, so
/// replaying one's changes into the other would only rewrite identical data.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreSignature(pub i32);

impl StoreSignature {
    /// Generate a fresh random signature.
    pub fn generate() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }

    /// Get the raw value.
    pub const fn as_i32(&self) -> i32 {
        self.0
    }
}

impl fmt::Debug for StoreSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreSignature({:08x})", self.0)
    }
}

impl fmt::Display for StoreSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ts_be_roundtrip() {
        let ts = TsNs::from_nanos(1_700_000_000_123_456_789);
        assert_eq!(TsNs::from_be_slice(&ts.to_be_bytes()), Some(ts));
    }

    #[test]
    fn test_ts_from_short_slice() {
        assert_eq!(TsNs::from_be_slice(&[1, 2, 3]), None);
    }

    #[test]
    fn test_ts_saturating_sub() {
        let ts = TsNs::from_nanos(5_000);
        assert_eq!(ts.saturating_sub(Duration::from_nanos(2_000)), TsNs(3_000));
        assert_eq!(ts.saturating_sub(Duration::from_secs(1)), TsNs::ZERO);
    }

    #[test]
    fn test_ts_now_is_positive() {
        assert!(TsNs::now() > TsNs::ZERO);
    }

    #[test]
    fn test_signature_display() {
        assert_eq!(StoreSignature(0x1a2b).to_string(), "00001a2b");
        assert!(format!("{:?}", StoreSignature(1)).starts_with("StoreSignature("));
    }

    #[test]
    fn test_peer_address_display() {
        let peer = PeerAddress::from("filer-a:8888");
        assert_eq!(peer.to_string(), "filer-a:8888");
        assert_eq!(peer.as_str(), "filer-a:8888");
    }
}
