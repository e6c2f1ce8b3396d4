pub mod disk;
pub mod table_iterator;

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::pages::{PageId, INVALID_PAGE_ID};
use crate::tuple::schema::Schema;

pub type TableId = i32;

/// Mutable chain state of a table, behind the table's append mutex. The
/// time-travel chain is created lazily on the first update; the last-page
/// ids are per-process caches for the append fast path.
#[derive(Debug)]
pub struct TableChain {
    pub time_travel_page_id: PageId,
    pub last_page_id: PageId,
    pub last_time_travel_page_id: PageId,
}

/// Handle to one table: schema, head of its page chain and the head of its
/// time-travel chain. Appends to either chain serialize on [`Table::chain`].
#[derive(Debug)]
pub struct Table {
    id: TableId,
    schema: Schema,
    page_id: PageId,
    chain: Mutex<TableChain>,
    cardinality: AtomicU64,
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Table {
    pub fn new(id: TableId, page_id: PageId, time_travel_page_id: PageId, schema: Schema) -> Self {
        Self {
            id,
            schema,
            page_id,
            chain: Mutex::new(TableChain {
                time_travel_page_id,
                last_page_id: INVALID_PAGE_ID,
                last_time_travel_page_id: INVALID_PAGE_ID,
            }),
            cardinality: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.schema.table_name()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Head of the table-space chain. Fixed for the table's lifetime.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Head of the time-travel chain, [`INVALID_PAGE_ID`] until the first
    /// version copy.
    pub fn time_travel_page_id(&self) -> PageId {
        self.chain.lock().time_travel_page_id
    }

    pub(crate) fn chain(&self) -> MutexGuard<'_, TableChain> {
        self.chain.lock()
    }

    pub fn cardinality(&self) -> u64 {
        self.cardinality.load(Ordering::Relaxed)
    }

    pub fn set_cardinality(&self, cardinality: u64) {
        self.cardinality.store(cardinality, Ordering::Relaxed);
    }

    pub(crate) fn increment_cardinality(&self) {
        self.cardinality.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decrement_cardinality(&self) {
        self.cardinality.fetch_sub(1, Ordering::Relaxed);
    }
}
