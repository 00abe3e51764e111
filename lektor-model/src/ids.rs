use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Numeric identifier of one lecture recording on the upstream portal.
///
/// Identifiers are strictly positive; zero is rejected at every boundary so
/// the rest of the system can treat the invariant as given.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u32", into = "u32")]
pub struct LectureId(NonZeroU32);

impl LectureId {
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Identifier `n` positions above this one. Saturates at `u32::MAX`,
    /// far beyond anything the portal will ever publish.
    pub fn offset(self, n: u32) -> Self {
        Self(self.0.saturating_add(n))
    }

    /// Identifier directly below this one, or `None` at the lower bound.
    pub fn pred(self) -> Option<Self> {
        Self::new(self.0.get() - 1)
    }
}

impl fmt::Display for LectureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<LectureId> for u32 {
    fn from(id: LectureId) -> Self {
        id.get()
    }
}

impl TryFrom<u32> for LectureId {
    type Error = ParseLectureIdError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or(ParseLectureIdError)
    }
}

impl FromStr for LectureId {
    type Err = ParseLectureIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u32 = s.parse().map_err(|_| ParseLectureIdError)?;
        raw.try_into()
    }
}

/// Error returned when parsing a lecture identifier from text or a raw
/// integer fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLectureIdError;

impl fmt::Display for ParseLectureIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lecture ids are positive integers")
    }
}

impl std::error::Error for ParseLectureIdError {}

/// Outcome of probing the portal for a lecture id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// HTTP 200: the recording page exists and is reachable.
    Available,
    /// HTTP 404: the id has not been published (yet).
    NotFound,
    /// HTTP 401: the session cookie is missing or expired.
    Unauthorized,
    /// HTTP 403: access denied; these come and go on the portal.
    Forbidden,
    /// Transport-level failure (timeout, DNS, connection reset).
    Unreachable,
}

impl ProbeStatus {
    pub fn is_available(self) -> bool {
        matches!(self, ProbeStatus::Available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero() {
        assert!(LectureId::new(0).is_none());
        assert!("0".parse::<LectureId>().is_err());
        assert!("-3".parse::<LectureId>().is_err());
        assert!("abc".parse::<LectureId>().is_err());
    }

    #[test]
    fn parses_and_displays() {
        let id: LectureId = "11519".parse().unwrap();
        assert_eq!(id.get(), 11519);
        assert_eq!(id.to_string(), "11519");
    }

    #[test]
    fn offset_and_pred() {
        let id = LectureId::new(100).unwrap();
        assert_eq!(id.offset(3).get(), 103);
        assert_eq!(id.pred().unwrap().get(), 99);
        assert_eq!(LectureId::new(1).unwrap().pred(), None);
    }

    #[test]
    fn serde_roundtrip_rejects_zero() {
        let id: LectureId = serde_json::from_str("42").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        assert!(serde_json::from_str::<LectureId>("0").is_err());
    }
}
