use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("invalid id length: expected 16 bytes, got {0}")]
    InvalidLength(usize),

    #[error("invalid id string: {0}")]
    InvalidString(String),
}

/// 16-byte time-ordered identifier used for all entity identity.
///
/// Backed by a UUIDv7: the first 6 bytes carry a millisecond timestamp, the
/// rest is a random tail. Lexicographic byte order therefore matches creation
/// order for ids created more than a millisecond apart, and the random tail
/// gives a stable total order within the same millisecond.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(Uuid);

impl Id {
    /// Allocate a fresh id stamped with the current millisecond.
    pub fn now() -> Self {
        Id(Uuid::now_v7())
    }

    pub const fn nil() -> Self {
        Id(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdError> {
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| IdError::InvalidLength(bytes.len()))?;
        Ok(Id(Uuid::from_bytes(arr)))
    }

    pub fn compare(&self, other: &Id) -> Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }

    /// Creation time embedded in the first 6 bytes.
    pub fn timestamp(&self) -> DateTime<Utc> {
        let b = self.0.as_bytes();
        let ms = ((b[0] as i64) << 40)
            | ((b[1] as i64) << 32)
            | ((b[2] as i64) << 24)
            | ((b[3] as i64) << 16)
            | ((b[4] as i64) << 8)
            | (b[5] as i64);
        Utc.timestamp_millis_opt(ms)
            .earliest()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.0)
    }
}

impl FromStr for Id {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::from_str(s)
            .map(Id)
            .map_err(|e| IdError::InvalidString(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let id = Id::now();
        let restored = Id::from_bytes(&id.bytes()).unwrap();
        assert_eq!(id, restored);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(Id::from_bytes(&[0u8; 8]), Err(IdError::InvalidLength(8)));
        assert_eq!(Id::from_bytes(&[0u8; 17]), Err(IdError::InvalidLength(17)));
    }

    #[test]
    fn orders_by_creation_time() {
        let a = Id::now();
        std::thread::sleep(std::time::Duration::from_millis(3));
        let b = Id::now();
        assert_eq!(a.compare(&b), Ordering::Less);
        assert!(a < b);
    }

    #[test]
    fn same_millisecond_ids_are_distinct_and_ordered() {
        let mut ids: Vec<Id> = (0..64).map(|_| Id::now()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 64);
        ids.sort();
        // a total order exists even when timestamps collide
        for pair in ids.windows(2) {
            assert_ne!(pair[0].compare(&pair[1]), Ordering::Equal);
        }
    }

    #[test]
    fn timestamp_matches_wall_clock() {
        let before = Utc::now().timestamp_millis();
        let id = Id::now();
        let after = Utc::now().timestamp_millis();
        let ts = id.timestamp().timestamp_millis();
        assert!(ts >= before - 1 && ts <= after + 1);
    }
}
