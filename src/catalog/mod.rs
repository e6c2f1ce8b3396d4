use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use log::{debug, info};

use crate::buffer_pool::ArcBufferPool;
use crate::errors::Error;
use crate::index::IndexDef;
use crate::pages::record_page::RecordPage;
use crate::pages::{PageId, INVALID_PAGE_ID};
use crate::table::disk::TableDiskManager;
use crate::table::table_iterator::TableIterator;
use crate::table::{Table, TableId};
use crate::tuple::schema::{Column, Schema};
use crate::tuple::Tuple;
use crate::txn_manager::transaction::Transaction;
use crate::txn_manager::ArcTransactionManager;
use crate::types::{Type, Value};

/// Reserved system pages. Page 0 carries engine metadata, pages 1..4 the
/// catalog record pages.
pub const METADATA_PAGE_ID: PageId = 0;
pub const TABLES_PAGE_ID: PageId = 1;
pub const COLUMNS_PAGE_ID: PageId = 2;
pub const INDICES_PAGE_ID: PageId = 3;
pub const STATISTICS_PAGE_ID: PageId = 4;

const TABLES_TABLE_ID: TableId = -1;
const COLUMNS_TABLE_ID: TableId = -2;
const INDICES_TABLE_ID: TableId = -3;
const STATISTICS_TABLE_ID: TableId = -4;

const NAME_LENGTH: u16 = 48;

/// The system catalog: remembers user tables, their columns, index
/// definitions and table statistics across restarts, stored as ordinary
/// record pages with fixed schemas.
pub struct Catalog {
    bpm: ArcBufferPool,
    tdm: TableDiskManager,

    tables_table: Table,
    columns_table: Table,
    indices_table: Table,
    statistics_table: Table,

    tables: HashMap<String, Arc<Table>>,
    index_defs: Vec<IndexDef>,
    /// (table id, column position) -> persisted column id, for index rows.
    column_ids: HashMap<(TableId, usize), i32>,

    next_table_id: TableId,
    next_column_id: i32,
    next_index_id: i32,
}

fn tables_schema() -> Schema {
    Schema::new(
        "system_tables",
        vec![
            Column::new("id", Type::Int),
            Column::new("name", Type::Char(NAME_LENGTH)),
            Column::new("page", Type::Int),
            Column::new("time_travel_page", Type::Long),
        ],
    )
}

fn columns_schema() -> Schema {
    Schema::new(
        "system_columns",
        vec![
            Column::new("id", Type::Int),
            Column::new("table_id", Type::Int),
            Column::new("type_id", Type::Int),
            Column::new("length", Type::Int),
            Column::new("name", Type::Char(NAME_LENGTH)),
            Column::new("is_nullable", Type::Int),
            Column::new("is_unique", Type::Int),
        ],
    )
}

fn indices_schema() -> Schema {
    Schema::new(
        "system_indices",
        vec![
            Column::new("id", Type::Int),
            Column::new("column_id", Type::Int),
            Column::new("type_id", Type::Int),
            Column::new("name", Type::Char(NAME_LENGTH)),
            Column::new("is_unique", Type::Int),
        ],
    )
}

fn statistics_schema() -> Schema {
    Schema::new(
        "system_table_statistics",
        vec![
            Column::new("table_id", Type::Int),
            Column::new("cardinality", Type::Long),
        ],
    )
}

impl Catalog {
    /// Builds the catalog over an existing database file, or initializes the
    /// reserved pages first on a fresh one. Loading runs under a short boot
    /// transaction.
    pub fn bootstrap(bpm: ArcBufferPool, txn_manager: &ArcTransactionManager, fresh: bool) -> Result<Self> {
        let mut catalog = Self {
            tdm: TableDiskManager::new(bpm.clone()),
            tables_table: Table::new(TABLES_TABLE_ID, TABLES_PAGE_ID, INVALID_PAGE_ID, tables_schema()),
            columns_table: Table::new(COLUMNS_TABLE_ID, COLUMNS_PAGE_ID, INVALID_PAGE_ID, columns_schema()),
            indices_table: Table::new(INDICES_TABLE_ID, INDICES_PAGE_ID, INVALID_PAGE_ID, indices_schema()),
            statistics_table: Table::new(
                STATISTICS_TABLE_ID,
                STATISTICS_PAGE_ID,
                INVALID_PAGE_ID,
                statistics_schema(),
            ),
            bpm,
            tables: HashMap::new(),
            index_defs: Vec::new(),
            column_ids: HashMap::new(),
            next_table_id: 0,
            next_column_id: 0,
            next_index_id: 0,
        };

        if fresh {
            catalog.initialize_reserved_pages()?;
            info!("initialized a fresh catalog");
        } else {
            let mut boot_txn = txn_manager.begin();
            catalog.load(&mut boot_txn)?;
            txn_manager.commit(boot_txn)?;
            info!("catalog loaded, {} table(s)", catalog.tables.len());
        }

        Ok(catalog)
    }

    fn initialize_reserved_pages(&mut self) -> Result<()> {
        // page 0, engine metadata
        let shared = self.bpm.lock().allocate_page()?;
        assert_eq!(shared.read().page_id(), METADATA_PAGE_ID);
        self.bpm.lock().unpin(METADATA_PAGE_ID, true)?;

        for expected in [TABLES_PAGE_ID, COLUMNS_PAGE_ID, INDICES_PAGE_ID, STATISTICS_PAGE_ID] {
            let shared = self.bpm.lock().allocate_record_page()?;
            assert_eq!(shared.read().page_id(), expected);
            self.bpm.lock().unpin(expected, true)?;
        }

        Ok(())
    }

    /// All rows of one system table visible to the boot transaction.
    fn scan_system_table(&self, table: &Table, txn: &mut Transaction) -> Result<Vec<Tuple>> {
        let mut iterator = TableIterator::new(&self.tdm, table, txn, None, 64);
        let mut rows = Vec::new();
        while let Some(row) = iterator.next_tuple()? {
            rows.push(row);
        }
        Ok(rows)
    }

    fn load(&mut self, txn: &mut Transaction) -> Result<()> {
        // columns grouped by table, ordered by persisted column id
        let mut columns_by_table: HashMap<TableId, Vec<(i32, Column)>> = HashMap::new();
        let columns_schema = self.columns_table.schema().clone();
        for row in self.scan_system_table(&self.columns_table, txn)? {
            let column_id = row.value(0, &columns_schema)?.as_int()?;
            let table_id = row.value(1, &columns_schema)?.as_int()?;
            let ty = Type::from_type_id(
                row.value(2, &columns_schema)?.as_int()?,
                row.value(3, &columns_schema)?.as_int()?,
            )?;
            let column = Column::new(row.value(4, &columns_schema)?.as_str()?, ty)
                .nullable(row.value(5, &columns_schema)?.as_int()? != 0)
                .unique(row.value(6, &columns_schema)?.as_int()? != 0);

            columns_by_table.entry(table_id).or_default().push((column_id, column));
            self.next_column_id = self.next_column_id.max(column_id + 1);
        }

        let mut statistics: HashMap<TableId, u64> = HashMap::new();
        let statistics_schema = self.statistics_table.schema().clone();
        for row in self.scan_system_table(&self.statistics_table, txn)? {
            statistics.insert(
                row.value(0, &statistics_schema)?.as_int()?,
                row.value(1, &statistics_schema)?.as_long()? as u64,
            );
        }

        let tables_schema = self.tables_table.schema().clone();
        for row in self.scan_system_table(&self.tables_table, txn)? {
            let table_id = row.value(0, &tables_schema)?.as_int()?;
            let name = row.value(1, &tables_schema)?.as_str()?.to_string();
            let page_id = row.value(2, &tables_schema)?.as_int()? as PageId;
            let time_travel_page = row.value(3, &tables_schema)?.as_long()?;
            let time_travel_page = if time_travel_page < 0 {
                INVALID_PAGE_ID
            } else {
                time_travel_page as PageId
            };

            let mut columns = columns_by_table.remove(&table_id).unwrap_or_default();
            columns.sort_by_key(|(column_id, _)| *column_id);
            for (position, (column_id, _)) in columns.iter().enumerate() {
                self.column_ids.insert((table_id, position), *column_id);
            }

            let schema = Schema::new(
                name.clone(),
                columns.into_iter().map(|(_, column)| column).collect(),
            );
            let table = Table::new(table_id, page_id, time_travel_page, schema);
            table.set_cardinality(statistics.get(&table_id).copied().unwrap_or(0));

            debug!("loaded table {name} (id {table_id}, head page {page_id})");
            self.tables.insert(name, Arc::new(table));
            self.next_table_id = self.next_table_id.max(table_id + 1);
        }

        // index definitions refer to persisted column ids
        let by_column_id: HashMap<i32, (TableId, usize)> = self
            .column_ids
            .iter()
            .map(|(&(table_id, position), &column_id)| (column_id, (table_id, position)))
            .collect();

        let indices_schema = self.indices_table.schema().clone();
        for row in self.scan_system_table(&self.indices_table, txn)? {
            let id = row.value(0, &indices_schema)?.as_int()?;
            let column_id = row.value(1, &indices_schema)?.as_int()?;
            let Some(&(table_id, column_index)) = by_column_id.get(&column_id) else {
                bail!(Error::Internal(format!("index row references unknown column {column_id}")));
            };

            self.index_defs.push(IndexDef {
                id,
                name: row.value(3, &indices_schema)?.as_str()?.to_string(),
                table_id,
                column_index,
                unique: row.value(4, &indices_schema)?.as_int()? != 0,
            });
            self.next_index_id = self.next_index_id.max(id + 1);
        }

        Ok(())
    }

    /// Creates a table: one fresh head page plus catalog rows for the table
    /// and each of its columns.
    pub fn create_table(&mut self, txn: &mut Transaction, schema: Schema) -> Result<Arc<Table>> {
        if self.tables.contains_key(schema.table_name()) {
            bail!(Error::TableExists(schema.table_name().to_string()));
        }

        let shared = self.bpm.lock().allocate_record_page()?;
        let page_id = shared.read().page_id();
        self.bpm.lock().unpin(page_id, true)?;

        let table_id = self.next_table_id;
        self.next_table_id += 1;

        let row = Tuple::new(
            &[
                Value::Int(table_id),
                Value::Char(schema.table_name().to_string()),
                Value::Int(page_id as i32),
                Value::Long(-1),
            ],
            self.tables_table.schema(),
        )?;
        self.tdm.insert_row(txn, &self.tables_table, &row)?;

        for (position, column) in schema.columns().iter().enumerate() {
            let column_id = self.next_column_id;
            self.next_column_id += 1;
            self.column_ids.insert((table_id, position), column_id);

            let row = Tuple::new(
                &[
                    Value::Int(column_id),
                    Value::Int(table_id),
                    Value::Int(column.ty.type_id()),
                    Value::Int(column.ty.length()),
                    Value::Char(column.name.clone()),
                    Value::Int(column.nullable as i32),
                    Value::Int(column.unique as i32),
                ],
                self.columns_table.schema(),
            )?;
            self.tdm.insert_row(txn, &self.columns_table, &row)?;
        }

        let row = Tuple::new(
            &[Value::Int(table_id), Value::Long(0)],
            self.statistics_table.schema(),
        )?;
        self.tdm.insert_row(txn, &self.statistics_table, &row)?;

        let table = Arc::new(Table::new(table_id, page_id, INVALID_PAGE_ID, schema));
        self.tables.insert(table.name().to_string(), table.clone());

        info!("created table {} (id {table_id})", table.name());
        Ok(table)
    }

    /// Registers an index over one column. The definition is persisted; the
    /// tree itself is built by the database owner.
    pub fn create_index(
        &mut self,
        txn: &mut Transaction,
        table_name: &str,
        column_name: &str,
        index_name: &str,
        unique: bool,
    ) -> Result<IndexDef> {
        let table = self
            .tables
            .get(table_name)
            .ok_or_else(|| Error::Internal(format!("no table named {table_name}")))
            .map_err(anyhow::Error::msg)?
            .clone();
        let column_index = table
            .schema()
            .column_index(column_name)
            .ok_or_else(|| Error::Internal(format!("no column named {column_name}")))
            .map_err(anyhow::Error::msg)?;

        let column_id = self.column_ids[&(table.id(), column_index)];
        let id = self.next_index_id;
        self.next_index_id += 1;

        let row = Tuple::new(
            &[
                Value::Int(id),
                Value::Int(column_id),
                Value::Int(0), // b+-tree
                Value::Char(index_name.to_string()),
                Value::Int(unique as i32),
            ],
            self.indices_table.schema(),
        )?;
        self.tdm.insert_row(txn, &self.indices_table, &row)?;

        let def = IndexDef {
            id,
            name: index_name.to_string(),
            table_id: table.id(),
            column_index,
            unique,
        };
        self.index_defs.push(def.clone());
        Ok(def)
    }

    pub fn table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.get(name).cloned()
    }

    pub fn table_by_id(&self, table_id: TableId) -> Option<Arc<Table>> {
        self.tables.values().find(|table| table.id() == table_id).cloned()
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<Table>> {
        self.tables.values()
    }

    pub fn index_defs(&self) -> &[IndexDef] {
        &self.index_defs
    }

    /// Writes the current head of each table's time-travel chain and its
    /// cardinality back into the catalog pages. Shutdown path; rewrites the
    /// catalog rows in place without a transaction.
    pub fn persist_table_state(&mut self) -> Result<()> {
        let by_id: HashMap<TableId, Arc<Table>> =
            self.tables.values().map(|table| (table.id(), table.clone())).collect();

        // statistics rows: (table_id, cardinality)
        self.rewrite_rows(STATISTICS_PAGE_ID, |payload| {
            let table_id = i32::from_ne_bytes(payload[0..4].try_into().unwrap());
            let table = by_id.get(&table_id)?;
            let mut bytes = payload.to_vec();
            bytes[4..12].copy_from_slice(&(table.cardinality() as i64).to_ne_bytes());
            Some(bytes)
        })?;

        // table rows: time_travel_page is the fourth column
        let schema = tables_schema();
        let time_travel_offset = schema.offset(3);
        self.rewrite_rows(TABLES_PAGE_ID, |payload| {
            let table_id = i32::from_ne_bytes(payload[0..4].try_into().unwrap());
            let table = by_id.get(&table_id)?;
            let head = table.time_travel_page_id();
            let persisted = if head == INVALID_PAGE_ID { -1i64 } else { head as i64 };
            let mut bytes = payload.to_vec();
            bytes[time_travel_offset..time_travel_offset + 8].copy_from_slice(&persisted.to_ne_bytes());
            Some(bytes)
        })?;

        Ok(())
    }

    /// Applies `rewrite` to every live record payload along a catalog page
    /// chain, writing back rows it returns.
    fn rewrite_rows(
        &self,
        head_page_id: PageId,
        mut rewrite: impl FnMut(&[u8]) -> Option<Vec<u8>>,
    ) -> Result<()> {
        let mut page_id = head_page_id;
        while page_id != INVALID_PAGE_ID {
            let shared = self.bpm.lock().pin(page_id)?;
            let next = {
                let mut page = shared.write();
                let mut record_page = RecordPage::new(&mut page);

                for slot_id in 0..record_page.slot_count() {
                    if record_page.is_free(slot_id) {
                        continue;
                    }
                    if let Some(bytes) = rewrite(record_page.record_payload(slot_id)) {
                        let metadata = record_page.record_metadata(slot_id);
                        record_page.write_record(slot_id, &metadata, &bytes);
                    }
                }
                record_page.page().next_page_id()
            };
            self.bpm.lock().unpin(page_id, true)?;
            page_id = next;
        }
        Ok(())
    }
}
