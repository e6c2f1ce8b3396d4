pub mod metadata;
pub mod timestamp;
pub mod transaction;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use log::{debug, trace};
use parking_lot::RwLock;

use crate::buffer_pool::{ArcBufferPool, PinGuard};
use crate::errors::Error;
use crate::pages::record_page::RecordPage;
use crate::table::disk::TableDiskManager;
use crate::table::TableId;
use crate::tuple::Tuple;

use metadata::RecordMetadata;
use timestamp::Timestamp;
use transaction::{IsolationLevel, ModificationKind, ScanSetItem, Transaction, WriteSetItem};

pub type ArcTransactionManager = Arc<TransactionManager>;

/// Hands out timestamps, tracks committed transactions and validates a
/// committing transaction against everything that committed while it ran.
///
/// Timestamps 0 and 1 are reserved (`0` packs into the +infinity sentinel),
/// so a fresh database starts counting at 2.
pub struct TransactionManager {
    bpm: ArcBufferPool,

    /// Slot bookkeeping is shared with the executor-facing surface so the
    /// rollback of an insert erases slots the same way row removal does.
    table_disk: TableDiskManager,

    next_timestamp: AtomicU64,

    /// Commit time -> transaction, for every committed transaction.
    /// Validation scans it in shared mode, a finished commit installs
    /// itself in exclusive mode.
    commit_history: RwLock<HashMap<u64, Transaction>>,
}

const FIRST_TIMESTAMP: u64 = 2;

/// Guarded timestamp writes applied during the commit and rollback phases.
#[derive(Debug, Clone, Copy)]
enum PatchOp {
    BeginTs { old: Timestamp, new: Timestamp },
    EndTs { old: Timestamp, new: Timestamp },
}

impl TransactionManager {
    pub fn new(bpm: ArcBufferPool) -> Self {
        Self {
            table_disk: TableDiskManager::new(bpm.clone()),
            bpm,
            next_timestamp: AtomicU64::new(FIRST_TIMESTAMP),
            commit_history: RwLock::new(HashMap::new()),
        }
    }

    /// Current value of the timestamp counter, persisted at shutdown.
    pub fn next_timestamp(&self) -> u64 {
        self.next_timestamp.load(Ordering::SeqCst)
    }

    /// Restores the counter after a restart.
    pub fn set_next_timestamp(&self, timestamp: u64) {
        self.next_timestamp.store(timestamp.max(FIRST_TIMESTAMP), Ordering::SeqCst);
    }

    pub fn begin(&self) -> Transaction {
        self.begin_with(IsolationLevel::Serializable)
    }

    pub fn begin_with(&self, isolation_level: IsolationLevel) -> Transaction {
        let time = self.next_timestamp.fetch_add(1, Ordering::SeqCst);
        trace!("transaction {time} begins");
        Transaction::new(isolation_level, Timestamp::new(time, false))
    }

    /// A version `[begin_ts, end_ts)` is visible to `transaction` iff it was
    /// committed at or before the transaction began and dies after it.
    /// Uncommitted timestamps belong to a running transaction and count only
    /// for that transaction's own reads.
    pub fn is_visible(transaction: &Transaction, begin_ts: Timestamp, end_ts: Timestamp) -> bool {
        let txn_time = transaction.begin_ts().time();

        let born = if begin_ts.is_committed() {
            begin_ts.time() <= txn_time
        } else {
            begin_ts.time() == txn_time
        };

        let alive = end_ts.is_infinity()
            || if end_ts.is_committed() {
                txn_time < end_ts.time()
            } else {
                end_ts.time() != txn_time
            };

        born && alive
    }

    pub fn is_visible_metadata(transaction: &Transaction, metadata: &RecordMetadata) -> bool {
        Self::is_visible(transaction, metadata.begin_ts(), metadata.end_ts())
    }

    /// Claims a commit timestamp, validates, and either installs the commit
    /// or rolls the transaction back. Returns whether the commit stuck.
    pub fn commit(&self, mut transaction: Transaction) -> Result<bool> {
        if transaction.is_aborted() {
            bail!(Error::TransactionAborted);
        }

        let commit_time = self.next_timestamp.fetch_add(1, Ordering::SeqCst);
        transaction.set_commit_ts(Timestamp::new(commit_time, true));

        if self.validate(&transaction)? {
            self.apply_commit(&transaction)?;
            self.commit_history.write().insert(commit_time, transaction);
            debug!("transaction committed at {commit_time}");
            Ok(true)
        } else {
            debug!(
                "transaction {} failed validation, rolling back",
                transaction.begin_ts().time()
            );
            self.revert(&transaction)?;
            Ok(false)
        }
    }

    /// Rolls back every write of the transaction. A second abort of the
    /// same transaction is a no-op.
    pub fn abort(&self, transaction: &mut Transaction) -> Result<()> {
        if transaction.is_aborted() {
            return Ok(());
        }
        self.revert(transaction)?;
        transaction.mark_aborted();
        debug!("transaction {} aborted", transaction.begin_ts().time());
        Ok(())
    }

    fn validate(&self, transaction: &Transaction) -> Result<bool> {
        let history = self.commit_history.read();
        let concurrent = Self::committed_between(
            &history,
            transaction.begin_ts().time() + 1,
            transaction.commit_ts().time().saturating_sub(1),
        );

        if concurrent.is_empty() {
            return Ok(true);
        }

        if !Self::validate_write_skew(transaction, &concurrent) {
            return Ok(false);
        }

        self.validate_scan_set(transaction, &concurrent)
    }

    fn committed_between<'a>(
        history: &'a HashMap<u64, Transaction>,
        begin: u64,
        end: u64,
    ) -> Vec<&'a Transaction> {
        let mut transactions = Vec::new();
        for time in begin..=end {
            if let Some(transaction) = history.get(&time) {
                transactions.push(transaction);
            }
        }
        transactions
    }

    /// Rejects when a concurrent committed transaction wrote a record this
    /// transaction read.
    fn validate_write_skew(transaction: &Transaction, concurrent: &[&Transaction]) -> bool {
        let read_records = transaction
            .read_set()
            .iter()
            .map(|item| item.in_place_rid())
            .collect::<std::collections::HashSet<_>>();

        for other in concurrent {
            for write in other.write_set() {
                if read_records.contains(&write.in_place_rid()) {
                    debug!(
                        "write skew: record {:?} read here, written by transaction committed at {}",
                        write.in_place_rid(),
                        other.commit_ts().time()
                    );
                    return false;
                }
            }
        }

        true
    }

    /// Rejects when a record written by a concurrent committed transaction
    /// matches one of this transaction's scan predicates (a phantom).
    fn validate_scan_set(&self, transaction: &Transaction, concurrent: &[&Transaction]) -> Result<bool> {
        let mut writes_by_table: HashMap<TableId, Vec<&WriteSetItem>> = HashMap::new();
        for other in concurrent {
            for write in other.write_set() {
                writes_by_table.entry(write.table_id()).or_default().push(write);
            }
        }

        for scan in transaction.scan_set() {
            let Some(writes) = writes_by_table.get(&scan.table_id()) else {
                continue;
            };
            if !self.validate_scan_set_item(scan, writes)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn validate_scan_set_item(&self, scan: &ScanSetItem, writes: &[&WriteSetItem]) -> Result<bool> {
        for write in writes {
            let rid = write.in_place_rid();
            let shared = self.bpm.lock().pin(rid.page_id())?;

            let tuple = {
                let mut page = shared.write();
                let record_page = RecordPage::new(&mut page);
                let metadata = record_page.record_metadata(rid.slot());
                Tuple::from_record(rid, metadata, record_page.record_payload(rid.slot()))
            };

            let matches = scan.predicate().matches(&tuple, scan.schema());
            self.bpm.lock().unpin(rid.page_id(), false)?;

            if matches {
                debug!("phantom: concurrent write {rid:?} matches a scan predicate");
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Write phase: stamp every written record with the commit timestamp.
    /// The guarded timestamp writes double as a corruption check; a record
    /// that no longer carries this transaction's begin timestamp has been
    /// clobbered.
    fn apply_commit(&self, transaction: &Transaction) -> Result<()> {
        let begin = transaction.begin_ts();
        let commit = transaction.commit_ts();

        for write in transaction.write_set() {
            match write.kind() {
                ModificationKind::Inserted => {
                    self.patch(write.in_place_rid(), PatchOp::BeginTs { old: begin, new: commit })?;
                }
                ModificationKind::Updated => {
                    self.patch(write.in_place_rid(), PatchOp::BeginTs { old: begin, new: commit })?;
                    self.patch(write.old_version_rid(), PatchOp::EndTs { old: begin, new: commit })?;
                }
                ModificationKind::Deleted => {
                    self.patch(write.in_place_rid(), PatchOp::EndTs { old: begin, new: commit })?;
                }
            }
        }

        Ok(())
    }

    /// Rollback phase. Every write-set entry carries enough to be reversed
    /// without new allocations, so failure here means the store is corrupt.
    fn revert(&self, transaction: &Transaction) -> Result<()> {
        let begin = transaction.begin_ts();

        for write in transaction.write_set() {
            match write.kind() {
                ModificationKind::Inserted => {
                    self.table_disk.free_slot(write.in_place_rid())?;
                }
                ModificationKind::Updated => {
                    self.restore_old_version(write)?;
                }
                ModificationKind::Deleted => {
                    self.patch(
                        write.in_place_rid(),
                        PatchOp::EndTs {
                            old: begin,
                            new: Timestamp::INFINITY,
                        },
                    )?;
                }
            }
        }

        Ok(())
    }

    /// Copies the old version back over the in-place record and frees its
    /// time-travel slot. Each page is pinned once, through a guard, so no
    /// return path can leave a pin behind.
    fn restore_old_version(&self, write: &WriteSetItem) -> Result<()> {
        let old_rid = write.old_version_rid();
        let in_place_rid = write.in_place_rid();

        let mut old_page = PinGuard::new(self.bpm.clone(), old_rid.page_id())?;

        let (mut metadata, payload) = {
            let mut page = old_page.page().write();
            let record_page = RecordPage::new(&mut page);
            (
                record_page.record_metadata(old_rid.slot()),
                record_page.record_payload(old_rid.slot()).to_vec(),
            )
        };
        metadata.set_end_ts(Timestamp::INFINITY);

        {
            let mut in_place_page = PinGuard::new(self.bpm.clone(), in_place_rid.page_id())?;
            RecordPage::new(&mut in_place_page.page().write()).write_record(
                in_place_rid.slot(),
                &metadata,
                &payload,
            );
            in_place_page.mark_dirty();
        }

        RecordPage::new(&mut old_page.page().write()).erase(old_rid.slot());
        old_page.mark_dirty();

        Ok(())
    }

    fn patch(&self, rid: crate::pages::RecordId, op: PatchOp) -> Result<()> {
        let shared = self.bpm.lock().pin(rid.page_id())?;
        let patched = {
            let mut page = shared.write();
            let mut record_page = RecordPage::new(&mut page);
            match op {
                PatchOp::BeginTs { old, new } => record_page.try_set_begin_ts(rid.slot(), old, new),
                PatchOp::EndTs { old, new } => record_page.try_set_end_ts(rid.slot(), old, new),
            }
        };
        self.bpm.lock().unpin(rid.page_id(), true)?;

        if !patched {
            bail!(Error::Internal(format!(
                "record {rid:?} changed under a committing transaction; refusing further writes"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::buffer_pool::tests::test_arc_bpm;

    pub fn test_arc_txn_manager(bpm: ArcBufferPool) -> ArcTransactionManager {
        Arc::new(TransactionManager::new(bpm))
    }

    #[test]
    fn test_begin_timestamps_are_monotonic() {
        let manager = TransactionManager::new(test_arc_bpm(2));

        let t1 = manager.begin();
        let t2 = manager.begin();

        assert!(t1.begin_ts().time() < t2.begin_ts().time());
        assert!(!t1.begin_ts().is_committed());
        assert!(t1.commit_ts().is_infinity());
    }

    #[test]
    fn test_counter_restore_never_goes_below_reserved() {
        let manager = TransactionManager::new(test_arc_bpm(2));
        manager.set_next_timestamp(0);
        assert_eq!(manager.next_timestamp(), FIRST_TIMESTAMP);

        manager.set_next_timestamp(99);
        assert_eq!(manager.next_timestamp(), 99);
    }

    #[test]
    fn test_visibility_window() {
        let manager = TransactionManager::new(test_arc_bpm(2));
        manager.set_next_timestamp(12);
        let reader = manager.begin(); // begin time 12

        // committed before the reader began, never dies
        assert!(TransactionManager::is_visible(
            &reader,
            Timestamp::new(11, true),
            Timestamp::INFINITY
        ));

        // committed after the reader began
        assert!(!TransactionManager::is_visible(
            &reader,
            Timestamp::new(13, true),
            Timestamp::INFINITY
        ));

        // died exactly when the reader began
        assert!(!TransactionManager::is_visible(
            &reader,
            Timestamp::new(5, true),
            Timestamp::new(12, true)
        ));

        // the reader's own uncommitted write
        assert!(TransactionManager::is_visible(
            &reader,
            Timestamp::new(12, false),
            Timestamp::INFINITY
        ));

        // someone else's uncommitted write
        assert!(!TransactionManager::is_visible(
            &reader,
            Timestamp::new(14, false),
            Timestamp::INFINITY
        ));

        // the reader's own uncommitted delete
        assert!(!TransactionManager::is_visible(
            &reader,
            Timestamp::new(5, true),
            Timestamp::new(12, false)
        ));

        // someone else's uncommitted delete does not hide the record yet
        assert!(TransactionManager::is_visible(
            &reader,
            Timestamp::new(5, true),
            Timestamp::new(14, false)
        ));
    }

    #[test]
    fn test_repeated_abort_is_a_no_op() -> Result<()> {
        let manager = TransactionManager::new(test_arc_bpm(2));

        let mut txn = manager.begin();
        manager.abort(&mut txn)?;
        assert!(txn.is_aborted());
        manager.abort(&mut txn)?;

        assert!(matches!(
            manager.commit(txn).unwrap_err().downcast_ref::<Error>(),
            Some(Error::TransactionAborted)
        ));
        Ok(())
    }
}
