use crate::pages::traits::Serialize;
use crate::pages::{RecordId, INVALID_RECORD_ID};

use super::timestamp::Timestamp;

pub const RECORD_METADATA_SIZE: usize = 32;

/// Versioning metadata prepended to every record payload on a page.
///
/// `original_rid` points at the slot in the table space this version
/// ultimately belongs to; for time-travel copies that is the in-place
/// record. `next_in_version_chain` threads to the next older version in
/// the time-travel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordMetadata {
    original_rid: RecordId,
    begin_ts: Timestamp,
    end_ts: Timestamp,
    next_in_version_chain: RecordId,
}

impl RecordMetadata {
    pub fn new(original_rid: RecordId, begin_ts: Timestamp) -> Self {
        Self {
            original_rid,
            begin_ts,
            end_ts: Timestamp::INFINITY,
            next_in_version_chain: INVALID_RECORD_ID,
        }
    }

    pub fn original_rid(&self) -> RecordId {
        self.original_rid
    }

    pub fn begin_ts(&self) -> Timestamp {
        self.begin_ts
    }

    pub fn end_ts(&self) -> Timestamp {
        self.end_ts
    }

    pub fn next_in_version_chain(&self) -> RecordId {
        self.next_in_version_chain
    }

    pub fn set_begin_ts(&mut self, begin_ts: Timestamp) {
        self.begin_ts = begin_ts;
    }

    pub fn set_end_ts(&mut self, end_ts: Timestamp) {
        self.end_ts = end_ts;
    }

    pub fn set_next_in_version_chain(&mut self, next: RecordId) {
        self.next_in_version_chain = next;
    }
}

impl Serialize for RecordMetadata {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(RECORD_METADATA_SIZE);
        bytes.extend_from_slice(&self.original_rid.to_raw().to_ne_bytes());
        bytes.extend_from_slice(&self.begin_ts.to_raw().to_ne_bytes());
        bytes.extend_from_slice(&self.end_ts.to_raw().to_ne_bytes());
        bytes.extend_from_slice(&self.next_in_version_chain.to_raw().to_ne_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), RECORD_METADATA_SIZE);
        let word = |i: usize| u64::from_ne_bytes(bytes[i * 8..(i + 1) * 8].try_into().unwrap());
        Self {
            original_rid: RecordId::from_raw(word(0)),
            begin_ts: Timestamp::from_raw(word(1)),
            end_ts: Timestamp::from_raw(word(2)),
            next_in_version_chain: RecordId::from_raw(word(3)),
        }
    }
}
