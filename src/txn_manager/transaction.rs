use crate::pages::RecordId;
use crate::predicate::PredicateMatcher;
use crate::table::TableId;
use crate::tuple::schema::Schema;

use super::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    Serializable,
}

/// One record read: the slot in the table space it belongs to plus the slot
/// that was actually read (an older version may live in the time-travel
/// space).
#[derive(Debug, Clone, Copy)]
pub struct ReadSetItem {
    in_place_rid: RecordId,
    read_rid: RecordId,
}

impl ReadSetItem {
    pub fn new(in_place_rid: RecordId, read_rid: RecordId) -> Self {
        Self {
            in_place_rid,
            read_rid,
        }
    }

    pub fn in_place_rid(&self) -> RecordId {
        self.in_place_rid
    }

    pub fn read_rid(&self) -> RecordId {
        self.read_rid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModificationKind {
    Inserted,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, Copy)]
pub struct WriteSetItem {
    table_id: TableId,
    in_place_rid: RecordId,
    old_version_rid: RecordId,
    kind: ModificationKind,
    written_size: u16,
}

impl WriteSetItem {
    pub fn inserted(table_id: TableId, rid: RecordId, written_size: u16) -> Self {
        Self {
            table_id,
            in_place_rid: rid,
            old_version_rid: rid,
            kind: ModificationKind::Inserted,
            written_size,
        }
    }

    pub fn updated(
        table_id: TableId,
        in_place_rid: RecordId,
        old_version_rid: RecordId,
        written_size: u16,
    ) -> Self {
        Self {
            table_id,
            in_place_rid,
            old_version_rid,
            kind: ModificationKind::Updated,
            written_size,
        }
    }

    pub fn deleted(table_id: TableId, rid: RecordId, written_size: u16) -> Self {
        Self {
            table_id,
            in_place_rid: rid,
            old_version_rid: rid,
            kind: ModificationKind::Deleted,
            written_size,
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn in_place_rid(&self) -> RecordId {
        self.in_place_rid
    }

    pub fn old_version_rid(&self) -> RecordId {
        self.old_version_rid
    }

    pub fn kind(&self) -> ModificationKind {
        self.kind
    }

    pub fn written_size(&self) -> u16 {
        self.written_size
    }
}

/// One table scan this transaction performed: the table, its schema at scan
/// time and the row filter, re-evaluated against concurrent writes at commit
/// to catch phantoms.
pub struct ScanSetItem {
    table_id: TableId,
    schema: Schema,
    predicate: Box<dyn PredicateMatcher>,
}

impl ScanSetItem {
    pub fn new(table_id: TableId, schema: Schema, predicate: Box<dyn PredicateMatcher>) -> Self {
        Self {
            table_id,
            schema,
            predicate,
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn predicate(&self) -> &dyn PredicateMatcher {
        self.predicate.as_ref()
    }
}

pub struct Transaction {
    isolation_level: IsolationLevel,
    begin_ts: Timestamp,
    commit_ts: Timestamp,

    read_set: Vec<ReadSetItem>,
    write_set: Vec<WriteSetItem>,
    scan_set: Vec<ScanSetItem>,

    aborted: bool,
}

impl Transaction {
    pub(super) fn new(isolation_level: IsolationLevel, begin_ts: Timestamp) -> Self {
        debug_assert!(!begin_ts.is_committed());
        Self {
            isolation_level,
            begin_ts,
            commit_ts: Timestamp::INFINITY,
            read_set: Vec::new(),
            write_set: Vec::new(),
            scan_set: Vec::new(),
            aborted: false,
        }
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn begin_ts(&self) -> Timestamp {
        self.begin_ts
    }

    pub fn commit_ts(&self) -> Timestamp {
        self.commit_ts
    }

    pub(super) fn set_commit_ts(&mut self, commit_ts: Timestamp) {
        self.commit_ts = commit_ts;
    }

    pub fn add_to_read_set(&mut self, item: ReadSetItem) {
        self.read_set.push(item);
    }

    pub fn add_to_write_set(&mut self, item: WriteSetItem) {
        self.write_set.push(item);
    }

    pub fn add_to_scan_set(&mut self, item: ScanSetItem) {
        self.scan_set.push(item);
    }

    pub fn read_set(&self) -> &[ReadSetItem] {
        &self.read_set
    }

    pub fn write_set(&self) -> &[WriteSetItem] {
        &self.write_set
    }

    pub fn scan_set(&self) -> &[ScanSetItem] {
        &self.scan_set
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub(super) fn mark_aborted(&mut self) {
        self.aborted = true;
    }
}
