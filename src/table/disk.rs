use std::collections::HashSet;

use anyhow::{bail, Result};
use log::trace;

use crate::buffer_pool::{ArcBufferPool, SharedPage};
use crate::config::PAGE_SIZE;
use crate::errors::Error;
use crate::pages::record_page::{RecordPage, RECORD_PAGE_HEADER_SIZE, SLOT_SIZE};
use crate::pages::{Page, PageId, RecordId, SlotId, INVALID_PAGE_ID};
use crate::tuple::schema::Schema;
use crate::tuple::Tuple;
use crate::txn_manager::metadata::{RecordMetadata, RECORD_METADATA_SIZE};
use crate::txn_manager::transaction::{Transaction, WriteSetItem};
use crate::txn_manager::TransactionManager;

use super::Table;

/// Largest payload a single record page can hold.
pub const MAX_RECORD_SIZE: usize =
    PAGE_SIZE - RECORD_PAGE_HEADER_SIZE - SLOT_SIZE - RECORD_METADATA_SIZE;

/// Maps tuples onto record pages: appends along a table's page chain,
/// copies old versions into the time-travel chain and resolves the version
/// visible to a transaction when reading.
pub struct TableDiskManager {
    bpm: ArcBufferPool,
}

impl TableDiskManager {
    pub fn new(bpm: ArcBufferPool) -> Self {
        Self { bpm }
    }

    pub fn bpm(&self) -> &ArcBufferPool {
        &self.bpm
    }

    /// Appends the tuple to the table space, stamped as born by `txn`, and
    /// unpins the page again.
    pub fn add_row(&self, txn: &Transaction, table: &Table, tuple: &Tuple) -> Result<RecordId> {
        let (rid, _page) = self.write_row(txn, table, tuple)?;
        self.bpm.lock().unpin(rid.page_id(), true)?;
        Ok(rid)
    }

    /// Like [`Self::add_row`] but returns the stored tuple with its page
    /// still pinned. The caller unpins (dirty) once done with it.
    pub fn add_row_and_get(&self, txn: &Transaction, table: &Table, tuple: &Tuple) -> Result<(Tuple, SharedPage)> {
        let (rid, shared) = self.write_row(txn, table, tuple)?;
        let stored = {
            let mut page = shared.write();
            let record_page = RecordPage::new(&mut page);
            Tuple::from_record(
                rid,
                record_page.record_metadata(rid.slot()),
                record_page.record_payload(rid.slot()),
            )
        };
        Ok((stored, shared))
    }

    fn write_row(&self, txn: &Transaction, table: &Table, tuple: &Tuple) -> Result<(RecordId, SharedPage)> {
        if tuple.data().len() > MAX_RECORD_SIZE {
            bail!(Error::RecordTooBig(MAX_RECORD_SIZE, tuple.data().len()));
        }

        let (page_id, slot_id) = self.find_page_for_row(table, false, tuple.data().len())?;
        let shared = self.bpm.lock().pin(page_id)?;

        let rid = RecordId::new(page_id, slot_id);
        let metadata = RecordMetadata::new(rid, txn.begin_ts());
        RecordPage::new(&mut shared.write()).write_record(slot_id, &metadata, tuple.data());

        trace!("row appended at {rid:?} for table {}", table.id());
        Ok((rid, shared))
    }

    /// Copies an existing version into the table's time-travel chain,
    /// closing its lifetime at `txn`'s begin timestamp. Updates and deletes
    /// call this before overwriting in place.
    pub fn copy_row_to_time_travel(&self, txn: &Transaction, table: &Table, tuple: &Tuple) -> Result<RecordId> {
        let (page_id, slot_id) = self.find_page_for_row(table, true, tuple.data().len())?;
        let shared = self.bpm.lock().pin(page_id)?;

        let mut metadata = *tuple.metadata();
        metadata.set_end_ts(txn.begin_ts());
        RecordPage::new(&mut shared.write()).write_record(slot_id, &metadata, tuple.data());

        self.bpm.lock().unpin(page_id, true)?;
        Ok(RecordId::new(page_id, slot_id))
    }

    /// Frees the record's slot.
    pub fn remove_row(&self, table: &Table, rid: RecordId) -> Result<()> {
        let _chain = table.chain();
        self.free_slot(rid)
    }

    /// Tombstones one slot, pinning its page just for the write. Row
    /// removal and the rollback of an uncommitted insert both end here.
    pub(crate) fn free_slot(&self, rid: RecordId) -> Result<()> {
        let shared = self.bpm.lock().pin(rid.page_id())?;
        RecordPage::new(&mut shared.write()).erase(rid.slot());
        self.bpm.lock().unpin(rid.page_id(), true)?;
        Ok(())
    }

    /// Collects the version of every live record on `page` that `txn` may
    /// see, walking version chains into the time-travel space where the
    /// in-place version is too young. Time-travel pages touched by a
    /// returned tuple stay pinned once each; the caller unpins them after
    /// consuming the tuples.
    pub fn read_rows(
        &self,
        page: &mut Page,
        txn: &Transaction,
        schema: &Schema,
    ) -> Result<(Vec<Tuple>, HashSet<PageId>)> {
        let page_id = page.page_id();
        let record_page = RecordPage::new(page);

        let mut rows = Vec::with_capacity(record_page.slot_count() as usize);
        let mut extra_pages = HashSet::new();

        for slot_id in 0..record_page.slot_count() {
            if record_page.is_free(slot_id) {
                continue;
            }

            let metadata = record_page.record_metadata(slot_id);
            if TransactionManager::is_visible_metadata(txn, &metadata) {
                rows.push(Tuple::from_record(
                    RecordId::new(page_id, slot_id),
                    metadata,
                    record_page.record_payload(slot_id),
                ));
                continue;
            }

            if let Some(tuple) = self.visible_old_version(txn, metadata.next_in_version_chain(), &mut extra_pages)? {
                debug_assert_eq!(tuple.data().len(), schema.row_size());
                rows.push(tuple);
            }
        }

        Ok((rows, extra_pages))
    }

    /// Walks a version chain until a version visible to `txn` turns up.
    fn visible_old_version(
        &self,
        txn: &Transaction,
        mut rid: RecordId,
        extra_pages: &mut HashSet<PageId>,
    ) -> Result<Option<Tuple>> {
        while rid.is_valid() {
            let shared = self.bpm.lock().pin(rid.page_id())?;

            enum Walk {
                Found(Tuple),
                Dead,
                Older(RecordId),
            }

            let outcome = {
                let mut page = shared.write();
                let record_page = RecordPage::new(&mut page);
                if record_page.is_free(rid.slot()) {
                    Walk::Dead
                } else {
                    let metadata = record_page.record_metadata(rid.slot());
                    if TransactionManager::is_visible_metadata(txn, &metadata) {
                        Walk::Found(Tuple::from_record(rid, metadata, record_page.record_payload(rid.slot())))
                    } else {
                        Walk::Older(metadata.next_in_version_chain())
                    }
                }
            };

            match outcome {
                Walk::Found(tuple) => {
                    // keep exactly one pin per page handed back to the caller
                    if !extra_pages.insert(rid.page_id()) {
                        self.bpm.lock().unpin(rid.page_id(), false)?;
                    }
                    return Ok(Some(tuple));
                }
                Walk::Dead => {
                    self.bpm.lock().unpin(rid.page_id(), false)?;
                    return Ok(None);
                }
                Walk::Older(next) => {
                    self.bpm.lock().unpin(rid.page_id(), false)?;
                    rid = next;
                }
            }
        }

        Ok(None)
    }

    /// Appends a fresh row and records the insert in `txn`'s write set.
    pub fn insert_row(&self, txn: &mut Transaction, table: &Table, tuple: &Tuple) -> Result<RecordId> {
        if txn.is_aborted() {
            bail!(Error::TransactionAborted);
        }

        let rid = self.add_row(txn, table, tuple)?;
        txn.add_to_write_set(WriteSetItem::inserted(table.id(), rid, tuple.data().len() as u16));
        table.increment_cardinality();
        Ok(rid)
    }

    /// Moves the current version to the time-travel space, overwrites the
    /// record in place with the new tuple and links the version chain.
    pub fn update_row(
        &self,
        txn: &mut Transaction,
        table: &Table,
        rid: RecordId,
        new_tuple: &Tuple,
    ) -> Result<RecordId> {
        if txn.is_aborted() {
            bail!(Error::TransactionAborted);
        }

        let old_tuple = {
            let shared = self.bpm.lock().pin(rid.page_id())?;
            let tuple = {
                let mut page = shared.write();
                let record_page = RecordPage::new(&mut page);
                Tuple::from_record(
                    rid,
                    record_page.record_metadata(rid.slot()),
                    record_page.record_payload(rid.slot()),
                )
            };
            self.bpm.lock().unpin(rid.page_id(), false)?;
            tuple
        };

        let old_version_rid = self.copy_row_to_time_travel(txn, table, &old_tuple)?;

        let shared = self.bpm.lock().pin(rid.page_id())?;
        {
            let mut metadata = RecordMetadata::new(rid, txn.begin_ts());
            metadata.set_next_in_version_chain(old_version_rid);
            RecordPage::new(&mut shared.write()).write_record(rid.slot(), &metadata, new_tuple.data());
        }
        self.bpm.lock().unpin(rid.page_id(), true)?;

        txn.add_to_write_set(WriteSetItem::updated(
            table.id(),
            rid,
            old_version_rid,
            new_tuple.data().len() as u16,
        ));
        Ok(rid)
    }

    /// Marks the record as dying at `txn`'s begin timestamp. The payload
    /// stays in place for older readers; commit turns the timestamp into
    /// the commit time, abort restores infinity.
    pub fn delete_row(&self, txn: &mut Transaction, table: &Table, rid: RecordId) -> Result<()> {
        if txn.is_aborted() {
            bail!(Error::TransactionAborted);
        }

        let shared = self.bpm.lock().pin(rid.page_id())?;
        let (stamped, row_size) = {
            let mut page = shared.write();
            let mut record_page = RecordPage::new(&mut page);
            let row_size = record_page.record_payload(rid.slot()).len();
            (
                record_page.try_set_end_ts(rid.slot(), crate::txn_manager::timestamp::Timestamp::INFINITY, txn.begin_ts()),
                row_size,
            )
        };
        self.bpm.lock().unpin(rid.page_id(), stamped)?;

        if !stamped {
            // another transaction already ended this version
            bail!(Error::TransactionConflict);
        }

        txn.add_to_write_set(WriteSetItem::deleted(table.id(), rid, row_size as u16));
        table.decrement_cardinality();
        Ok(())
    }

    /// Finds (or creates) a page in the table's chain with room for the
    /// payload and reserves a slot on it. Holding the chain mutex keeps two
    /// writers from splicing pages into the chain at once.
    fn find_page_for_row(&self, table: &Table, time_travel: bool, payload_size: usize) -> Result<(PageId, SlotId)> {
        let needed = payload_size + RECORD_METADATA_SIZE + SLOT_SIZE;
        let mut chain = table.chain();

        let mut page_id = if time_travel {
            if chain.last_time_travel_page_id != INVALID_PAGE_ID {
                chain.last_time_travel_page_id
            } else if chain.time_travel_page_id != INVALID_PAGE_ID {
                chain.time_travel_page_id
            } else {
                let shared = self.bpm.lock().allocate_record_page()?;
                let head = shared.read().page_id();
                self.bpm.lock().unpin(head, true)?;
                chain.time_travel_page_id = head;
                head
            }
        } else if chain.last_page_id != INVALID_PAGE_ID {
            chain.last_page_id
        } else {
            table.page_id()
        };

        loop {
            let shared = self.bpm.lock().pin(page_id)?;

            let (free_space, next_page_id) = {
                let mut page = shared.write();
                let record_page = RecordPage::new(&mut page);
                (record_page.free_space(), record_page.page().next_page_id())
            };

            if free_space >= needed {
                let slot_id = RecordPage::new(&mut shared.write()).allocate_slot(payload_size);
                self.bpm.lock().unpin(page_id, true)?;

                if time_travel {
                    chain.last_time_travel_page_id = page_id;
                } else {
                    chain.last_page_id = page_id;
                }
                return Ok((page_id, slot_id));
            }

            if next_page_id != INVALID_PAGE_ID {
                self.bpm.lock().unpin(page_id, false)?;
                page_id = next_page_id;
                continue;
            }

            // end of the chain, splice in a fresh page
            let new_shared = self.bpm.lock().allocate_record_page()?;
            let new_page_id = new_shared.read().page_id();
            shared.write().set_next_page_id(new_page_id);
            self.bpm.lock().unpin(page_id, true)?;

            let slot_id = RecordPage::new(&mut new_shared.write()).allocate_slot(payload_size);
            self.bpm.lock().unpin(new_page_id, true)?;

            if time_travel {
                chain.last_time_travel_page_id = new_page_id;
            } else {
                chain.last_page_id = new_page_id;
            }
            return Ok((new_page_id, slot_id));
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::buffer_pool::tests::test_arc_bpm;
    use crate::predicate::{AlwaysTrue, ColumnValueMatcher, Comparison};
    use crate::table::table_iterator::TableIterator;
    use crate::tuple::schema::Column;
    use crate::txn_manager::tests::test_arc_txn_manager;
    use crate::txn_manager::transaction::ScanSetItem;
    use crate::txn_manager::ArcTransactionManager;
    use crate::types::{Type, Value};

    pub struct Fixture {
        pub bpm: ArcBufferPool,
        pub txn_manager: ArcTransactionManager,
        pub tdm: TableDiskManager,
    }

    pub fn test_fixture(frames: usize) -> Fixture {
        let bpm = test_arc_bpm(frames);
        Fixture {
            txn_manager: test_arc_txn_manager(bpm.clone()),
            tdm: TableDiskManager::new(bpm.clone()),
            bpm,
        }
    }

    pub fn users_schema() -> Schema {
        Schema::new(
            "users",
            vec![Column::new("id", Type::Int), Column::new("age", Type::Int)],
        )
    }

    pub fn make_table(fixture: &Fixture, id: crate::table::TableId, schema: Schema) -> Result<Table> {
        let shared = fixture.bpm.lock().allocate_record_page()?;
        let page_id = shared.read().page_id();
        fixture.bpm.lock().unpin(page_id, true)?;
        Ok(Table::new(id, page_id, INVALID_PAGE_ID, schema))
    }

    fn user(id: i32, age: i32, schema: &Schema) -> Tuple {
        Tuple::new(&[Value::Int(id), Value::Int(age)], schema).unwrap()
    }

    /// All rows of the table as the transaction sees them.
    pub fn scan_all(fixture: &Fixture, table: &Table, txn: &mut Transaction) -> Result<Vec<Tuple>> {
        let mut iterator = TableIterator::new(&fixture.tdm, table, txn, Some(Box::new(AlwaysTrue)), 64);
        let mut rows = Vec::new();
        while let Some(tuple) = iterator.next_tuple()? {
            rows.push(tuple);
        }
        Ok(rows)
    }

    #[test]
    fn test_add_row_and_read_back() -> Result<()> {
        let fixture = test_fixture(8);
        let schema = users_schema();
        let table = make_table(&fixture, 1, schema.clone())?;

        let txn = fixture.txn_manager.begin();
        let rid = fixture.tdm.add_row(&txn, &table, &user(1, 30, &schema))?;

        assert_eq!(rid.page_id(), table.page_id());
        assert_eq!(rid.slot(), 0);
        assert_eq!(fixture.bpm.lock().pin_count(rid.page_id()), Some(0));

        let shared = fixture.bpm.lock().pin(rid.page_id())?;
        let (rows, extra) = fixture.tdm.read_rows(&mut shared.write(), &txn, &schema)?;
        fixture.bpm.lock().unpin(rid.page_id(), false)?;

        assert!(extra.is_empty());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value_of("age", &schema)?, Value::Int(30));
        assert_eq!(rows[0].metadata().begin_ts(), txn.begin_ts());
        assert!(rows[0].metadata().end_ts().is_infinity());
        Ok(())
    }

    #[test]
    fn test_add_row_and_get_leaves_page_pinned() -> Result<()> {
        let fixture = test_fixture(8);
        let schema = users_schema();
        let table = make_table(&fixture, 1, schema.clone())?;

        let txn = fixture.txn_manager.begin();
        let (stored, _page) = fixture.tdm.add_row_and_get(&txn, &table, &user(2, 41, &schema))?;

        assert_eq!(stored.value_of("id", &schema)?, Value::Int(2));
        assert_eq!(fixture.bpm.lock().pin_count(stored.rid().page_id()), Some(1));

        fixture.bpm.lock().unpin(stored.rid().page_id(), true)?;
        Ok(())
    }

    #[test]
    fn test_chain_grows_when_page_fills() -> Result<()> {
        let fixture = test_fixture(8);
        let schema = users_schema();
        let table = make_table(&fixture, 1, schema.clone())?;

        let row_bytes = schema.row_size() + RECORD_METADATA_SIZE + SLOT_SIZE;
        let per_page = (PAGE_SIZE - RECORD_PAGE_HEADER_SIZE) / row_bytes;

        let mut txn = fixture.txn_manager.begin();
        for i in 0..per_page + 1 {
            fixture.tdm.insert_row(&mut txn, &table, &user(i as i32, 20, &schema))?;
        }

        assert_ne!(table.chain().last_page_id, table.page_id());

        let rows = scan_all(&fixture, &table, &mut txn)?;
        assert_eq!(rows.len(), per_page + 1);
        assert!(fixture.txn_manager.commit(txn)?);
        Ok(())
    }

    #[test]
    fn test_remove_row_frees_the_slot() -> Result<()> {
        let fixture = test_fixture(8);
        let schema = users_schema();
        let table = make_table(&fixture, 1, schema.clone())?;

        let mut txn = fixture.txn_manager.begin();
        let keep = fixture.tdm.insert_row(&mut txn, &table, &user(1, 30, &schema))?;
        let doomed = fixture.tdm.insert_row(&mut txn, &table, &user(2, 40, &schema))?;
        assert!(fixture.txn_manager.commit(txn)?);

        fixture.tdm.remove_row(&table, doomed)?;

        let shared = fixture.bpm.lock().pin(doomed.page_id())?;
        {
            let mut page = shared.write();
            let record_page = RecordPage::new(&mut page);
            assert!(record_page.is_free(doomed.slot()));
            assert!(!record_page.is_free(keep.slot()));
        }
        fixture.bpm.lock().unpin(doomed.page_id(), false)?;

        // freed slots are invisible to every scan
        let mut reader = fixture.txn_manager.begin();
        let rows = scan_all(&fixture, &table, &mut reader)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rid(), keep);
        assert!(fixture.txn_manager.commit(reader)?);
        Ok(())
    }

    #[test]
    fn test_update_builds_version_chain() -> Result<()> {
        let fixture = test_fixture(8);
        let schema = users_schema();
        let table = make_table(&fixture, 1, schema.clone())?;

        let mut t1 = fixture.txn_manager.begin();
        let rid = fixture.tdm.insert_row(&mut t1, &table, &user(1, 30, &schema))?;
        assert!(fixture.txn_manager.commit(t1)?);

        // an old reader that began before the update
        let mut old_reader = fixture.txn_manager.begin();

        let mut t2 = fixture.txn_manager.begin();
        fixture.tdm.update_row(&mut t2, &table, rid, &user(1, 31, &schema))?;
        assert!(fixture.txn_manager.commit(t2)?);

        assert_ne!(table.time_travel_page_id(), INVALID_PAGE_ID);

        // the old reader still sees the old version through the chain
        let rows = scan_all(&fixture, &table, &mut old_reader)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value_of("age", &schema)?, Value::Int(30));
        assert_eq!(rows[0].rid().page_id(), table.time_travel_page_id());
        // it read a record the concurrent update wrote, so its commit fails
        assert!(!fixture.txn_manager.commit(old_reader)?);

        // a fresh reader sees the new version in place
        let mut new_reader = fixture.txn_manager.begin();
        let rows = scan_all(&fixture, &table, &mut new_reader)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value_of("age", &schema)?, Value::Int(31));
        assert_eq!(rows[0].rid(), rid);
        assert!(fixture.txn_manager.commit(new_reader)?);
        Ok(())
    }

    #[test]
    fn test_delete_hides_row_from_later_readers_only() -> Result<()> {
        let fixture = test_fixture(8);
        let schema = users_schema();
        let table = make_table(&fixture, 1, schema.clone())?;

        let mut t1 = fixture.txn_manager.begin();
        let rid = fixture.tdm.insert_row(&mut t1, &table, &user(1, 30, &schema))?;
        assert!(fixture.txn_manager.commit(t1)?);

        let mut old_reader = fixture.txn_manager.begin();

        let mut t2 = fixture.txn_manager.begin();
        fixture.tdm.delete_row(&mut t2, &table, rid)?;
        assert!(fixture.txn_manager.commit(t2)?);

        assert_eq!(scan_all(&fixture, &table, &mut old_reader)?.len(), 1);
        // the read of the concurrently deleted record dooms the commit
        assert!(!fixture.txn_manager.commit(old_reader)?);

        let mut new_reader = fixture.txn_manager.begin();
        assert!(scan_all(&fixture, &table, &mut new_reader)?.is_empty());
        assert!(fixture.txn_manager.commit(new_reader)?);
        Ok(())
    }

    #[test]
    fn test_own_writes_are_visible_before_commit() -> Result<()> {
        let fixture = test_fixture(8);
        let schema = users_schema();
        let table = make_table(&fixture, 1, schema.clone())?;

        let mut txn = fixture.txn_manager.begin();
        fixture.tdm.insert_row(&mut txn, &table, &user(9, 9, &schema))?;

        let rows = scan_all(&fixture, &table, &mut txn)?;
        assert_eq!(rows.len(), 1);

        // nobody else sees the uncommitted row
        let mut other = fixture.txn_manager.begin();
        assert!(scan_all(&fixture, &table, &mut other)?.is_empty());

        assert!(fixture.txn_manager.commit(txn)?);
        // the insert that committed meanwhile is a phantom for other's scan
        assert!(!fixture.txn_manager.commit(other)?);
        Ok(())
    }

    #[test]
    fn test_abort_insert_frees_the_slot() -> Result<()> {
        let fixture = test_fixture(8);
        let schema = users_schema();
        let table = make_table(&fixture, 1, schema.clone())?;

        let mut txn = fixture.txn_manager.begin();
        let rid = fixture.tdm.insert_row(&mut txn, &table, &user(1, 1, &schema))?;
        fixture.txn_manager.abort(&mut txn)?;

        let shared = fixture.bpm.lock().pin(rid.page_id())?;
        assert!(RecordPage::new(&mut shared.write()).is_free(rid.slot()));
        fixture.bpm.lock().unpin(rid.page_id(), false)?;
        Ok(())
    }

    #[test]
    fn test_abort_update_restores_old_version() -> Result<()> {
        let fixture = test_fixture(8);
        let schema = users_schema();
        let table = make_table(&fixture, 1, schema.clone())?;

        let mut t1 = fixture.txn_manager.begin();
        let rid = fixture.tdm.insert_row(&mut t1, &table, &user(1, 30, &schema))?;
        assert!(fixture.txn_manager.commit(t1)?);

        let mut t2 = fixture.txn_manager.begin();
        fixture.tdm.update_row(&mut t2, &table, rid, &user(1, 99, &schema))?;
        fixture.txn_manager.abort(&mut t2)?;

        let mut reader = fixture.txn_manager.begin();
        let rows = scan_all(&fixture, &table, &mut reader)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value_of("age", &schema)?, Value::Int(30));
        assert!(rows[0].metadata().end_ts().is_infinity());
        assert!(fixture.txn_manager.commit(reader)?);
        Ok(())
    }

    #[test]
    fn test_abort_delete_restores_lifetime() -> Result<()> {
        let fixture = test_fixture(8);
        let schema = users_schema();
        let table = make_table(&fixture, 1, schema.clone())?;

        let mut t1 = fixture.txn_manager.begin();
        fixture.tdm.insert_row(&mut t1, &table, &user(1, 30, &schema))?;
        assert!(fixture.txn_manager.commit(t1)?);

        let mut t2 = fixture.txn_manager.begin();
        let rid = {
            let mut reader = fixture.txn_manager.begin();
            let rows = scan_all(&fixture, &table, &mut reader)?;
            assert!(fixture.txn_manager.commit(reader)?);
            rows[0].rid()
        };
        fixture.tdm.delete_row(&mut t2, &table, rid)?;
        fixture.txn_manager.abort(&mut t2)?;

        let mut reader = fixture.txn_manager.begin();
        assert_eq!(scan_all(&fixture, &table, &mut reader)?.len(), 1);
        assert!(fixture.txn_manager.commit(reader)?);
        Ok(())
    }

    #[test]
    fn test_mvcc_commit_timestamp_gates_visibility() -> Result<()> {
        // the inserter commits, a transaction born after the commit sees
        // the row, one born before does not
        let fixture = test_fixture(8);
        let schema = users_schema();
        let table = make_table(&fixture, 1, schema.clone())?;

        let mut early_reader = fixture.txn_manager.begin();

        let mut writer = fixture.txn_manager.begin();
        fixture.tdm.insert_row(&mut writer, &table, &user(7, 70, &schema))?;
        assert!(fixture.txn_manager.commit(writer)?);

        let mut late_reader = fixture.txn_manager.begin();

        assert!(scan_all(&fixture, &table, &mut early_reader)?.is_empty());
        assert_eq!(scan_all(&fixture, &table, &mut late_reader)?.len(), 1);

        // the writer's commit landed inside early_reader's lifetime and its
        // row matches the scan, so only the late reader commits
        assert!(!fixture.txn_manager.commit(early_reader)?);
        assert!(fixture.txn_manager.commit(late_reader)?);
        Ok(())
    }

    #[test]
    fn test_write_skew_is_rejected() -> Result<()> {
        let fixture = test_fixture(8);
        let schema = users_schema();
        let table = make_table(&fixture, 1, schema.clone())?;

        let mut setup = fixture.txn_manager.begin();
        let r = fixture.tdm.insert_row(&mut setup, &table, &user(1, 10, &schema))?;
        let s = fixture.tdm.insert_row(&mut setup, &table, &user(2, 20, &schema))?;
        assert!(fixture.txn_manager.commit(setup)?);

        // T1 reads r and writes s
        let mut t1 = fixture.txn_manager.begin();
        let rows = scan_all(&fixture, &table, &mut t1)?;
        assert_eq!(rows.len(), 2);
        fixture.tdm.update_row(&mut t1, &table, s, &user(2, 21, &schema))?;

        // T2 writes r and commits first
        let mut t2 = fixture.txn_manager.begin();
        fixture.tdm.update_row(&mut t2, &table, r, &user(1, 11, &schema))?;
        assert!(fixture.txn_manager.commit(t2)?);

        // T1 read what T2 wrote: validation must reject it
        assert!(!fixture.txn_manager.commit(t1)?);

        // T1's write to s was rolled back
        let mut reader = fixture.txn_manager.begin();
        let rows = scan_all(&fixture, &table, &mut reader)?;
        let ages = rows
            .iter()
            .map(|row| row.value_of("age", &schema).unwrap())
            .collect::<Vec<_>>();
        assert!(ages.contains(&Value::Int(11)));
        assert!(ages.contains(&Value::Int(20)));
        assert!(fixture.txn_manager.commit(reader)?);
        Ok(())
    }

    #[test]
    fn test_phantom_scan_is_rejected() -> Result<()> {
        let fixture = test_fixture(8);
        let schema = users_schema();
        let table = make_table(&fixture, 1, schema.clone())?;
        let other_table = make_table(&fixture, 2, users_schema())?;

        // T1 scans for minors (none) and writes an unrelated row elsewhere
        let mut t1 = fixture.txn_manager.begin();
        let minors: Box<dyn crate::predicate::PredicateMatcher> =
            Box::new(ColumnValueMatcher::new(1, Comparison::Lt, Value::Int(18)));
        {
            let mut iterator = TableIterator::new(&fixture.tdm, &table, &mut t1, Some(minors.clone()), 64);
            assert!(iterator.next_tuple()?.is_none());
        }
        fixture.tdm.insert_row(&mut t1, &other_table, &user(99, 99, &schema))?;

        // T2 inserts a minor into the scanned table and commits
        let mut t2 = fixture.txn_manager.begin();
        fixture.tdm.insert_row(&mut t2, &table, &user(1, 10, &schema))?;
        assert!(fixture.txn_manager.commit(t2)?);

        // T1's scan set re-evaluates against T2's write and matches
        assert!(!fixture.txn_manager.commit(t1)?);
        Ok(())
    }

    #[test]
    fn test_concurrent_writers_append_without_losing_rows() -> Result<()> {
        let fixture = test_fixture(32);
        let schema = users_schema();
        let table = make_table(&fixture, 1, schema.clone())?;

        const WRITERS: i32 = 4;
        const ROWS_PER_WRITER: i32 = 50;

        std::thread::scope(|scope| {
            for writer in 0..WRITERS {
                let fixture = &fixture;
                let table = &table;
                let schema = &schema;
                scope.spawn(move || {
                    let mut txn = fixture.txn_manager.begin();
                    for i in 0..ROWS_PER_WRITER {
                        let tuple = user(writer * ROWS_PER_WRITER + i, 20, schema);
                        fixture.tdm.insert_row(&mut txn, table, &tuple).unwrap();
                    }
                    assert!(fixture.txn_manager.commit(txn).unwrap());
                });
            }
        });

        let mut reader = fixture.txn_manager.begin();
        let rows = scan_all(&fixture, &table, &mut reader)?;
        assert_eq!(rows.len(), (WRITERS * ROWS_PER_WRITER) as usize);

        let mut ids = rows
            .iter()
            .map(|row| row.value_of("id", &schema).unwrap().as_int().unwrap())
            .collect::<Vec<_>>();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), (WRITERS * ROWS_PER_WRITER) as usize);

        assert_eq!(table.cardinality(), (WRITERS * ROWS_PER_WRITER) as u64);
        assert!(fixture.txn_manager.commit(reader)?);
        Ok(())
    }

    #[test]
    fn test_scan_set_ignores_non_matching_writes() -> Result<()> {
        let fixture = test_fixture(8);
        let schema = users_schema();
        let table = make_table(&fixture, 1, schema.clone())?;

        let mut t1 = fixture.txn_manager.begin();
        t1.add_to_scan_set(ScanSetItem::new(
            table.id(),
            schema.clone(),
            Box::new(ColumnValueMatcher::new(1, Comparison::Lt, Value::Int(18))),
        ));

        // a concurrent insert that does not match the predicate
        let mut t2 = fixture.txn_manager.begin();
        fixture.tdm.insert_row(&mut t2, &table, &user(1, 42, &schema))?;
        assert!(fixture.txn_manager.commit(t2)?);

        assert!(fixture.txn_manager.commit(t1)?);
        Ok(())
    }
}
