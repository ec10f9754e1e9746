//! Identifiers shared by the write path and the ingest loop.
//!
//! Identifiers are assigned upstream (by the tracker that opened the session), so unlike
//! catalog ids there is no process-local allocator here: these types only give the raw
//! integers a name and a stable ordering.

use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use thiserror::Error;

/// A session id that does not fit the signed `bigint` column it is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("session id {0} is out of range, the largest storable id is {max}", max = SessionId::MAX)]
pub struct SessionIdOutOfRange(pub u64);

/// Identifies one recorded session. All writes for a session are applied in arrival order.
///
/// Ids are unsigned on the wire but stored as Postgres `bigint`, so they never exceed
/// [`SessionId::MAX`]. Decoding a larger id fails.
#[derive(Debug, Copy, Clone, Eq, PartialOrd, Ord, PartialEq, Serialize, Deserialize, Hash)]
#[serde(try_from = "u64", into = "u64")]
pub struct SessionId(u64);

impl SessionId {
    /// The largest id a `bigint` column can hold.
    pub const MAX: u64 = i64::MAX as u64;

    /// Panics if `id` is above [`SessionId::MAX`]; use [`TryFrom`] for untrusted input.
    pub const fn new(id: u64) -> Self {
        assert!(id <= Self::MAX, "session id out of range");
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The id as the signed integer Postgres `bigint` columns store.
    pub fn as_i64(&self) -> i64 {
        // lossless, the id is at most i64::MAX
        self.0 as i64
    }
}

impl TryFrom<u64> for SessionId {
    type Error = SessionIdOutOfRange;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > Self::MAX {
            return Err(SessionIdOutOfRange(value));
        }
        Ok(Self(value))
    }
}

impl From<SessionId> for u64 {
    fn from(value: SessionId) -> Self {
        value.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the project a session was recorded for.
#[derive(Debug, Copy, Clone, Eq, PartialOrd, Ord, PartialEq, Serialize, Deserialize, Hash)]
#[serde(transparent)]
pub struct ProjectId(u32);

impl ProjectId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for ProjectId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_order_numerically() {
        let mut ids = vec![SessionId::new(30), SessionId::new(2), SessionId::new(11)];
        ids.sort();
        assert_eq!(
            ids,
            vec![SessionId::new(2), SessionId::new(11), SessionId::new(30)]
        );
    }

    #[test]
    fn ids_deserialize_from_bare_integers() {
        let id: SessionId = serde_json::from_str("7421").unwrap();
        assert_eq!(id.as_u64(), 7421);
        let id: ProjectId = serde_json::from_str("3").unwrap();
        assert_eq!(id, ProjectId::from(3));
        assert_eq!(serde_json::to_string(&SessionId::new(9)).unwrap(), "9");
    }

    #[test]
    fn session_id_range_matches_bigint() {
        let max = SessionId::try_from(SessionId::MAX).unwrap();
        assert_eq!(max.as_i64(), i64::MAX);
        assert_eq!(
            SessionId::try_from(SessionId::MAX + 1),
            Err(SessionIdOutOfRange(SessionId::MAX + 1))
        );
        assert_eq!(SessionId::try_from(u64::MAX), Err(SessionIdOutOfRange(u64::MAX)));
    }

    #[test]
    fn out_of_range_session_id_fails_to_decode() {
        let err = serde_json::from_str::<SessionId>("18446744073709551615").unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
        assert!(serde_json::from_str::<SessionId>("9223372036854775808").is_err());

        let id: SessionId = serde_json::from_str("9223372036854775807").unwrap();
        assert_eq!(id.as_i64(), i64::MAX);
    }

    #[test]
    #[should_panic(expected = "session id out of range")]
    fn new_rejects_out_of_range_id() {
        SessionId::new(u64::MAX);
    }
}
