use crate::error::{PipelineError, Result};
use crate::role::RoleId;

/// Maximum payload length in bytes for a single line
pub const MAX_PAYLOAD_LEN: usize = 1024;

/// One raw input line tagged with where it came from.
///
/// `owner` is resolved once per origin by the role table, so consumers match
/// on a typed id instead of re-inspecting the origin string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    payload: String,
    origin: String,
    owner: RoleId,
}

impl Record {
    /// Build a record, rejecting payloads over [`MAX_PAYLOAD_LEN`]
    pub fn new(payload: impl Into<String>, origin: impl Into<String>, owner: RoleId) -> Result<Self> {
        let payload = payload.into();
        let origin = origin.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(PipelineError::RecordTooLong {
                origin,
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Self {
            payload,
            origin,
            owner,
        })
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn owner(&self) -> RoleId {
        self.owner
    }

    /// Split the payload on commas
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.payload.split(',')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accessors() {
        let record = Record::new("a,b,c", "data/football/x.csv", RoleId::new(1)).unwrap();
        assert_eq!(record.payload(), "a,b,c");
        assert_eq!(record.origin(), "data/football/x.csv");
        assert_eq!(record.owner(), RoleId::new(1));
        assert_eq!(record.fields().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let line = "x".repeat(MAX_PAYLOAD_LEN + 1);
        let err = Record::new(line, "big.csv", RoleId::new(0)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::RecordTooLong { len, max, .. } if len == MAX_PAYLOAD_LEN + 1 && max == MAX_PAYLOAD_LEN
        ));
    }
}
