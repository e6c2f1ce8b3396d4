use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use log::{error, info};
use parking_lot::FairMutex;

use crate::buffer_pool::{ArcBufferPool, BufferPool};
use crate::catalog::{Catalog, METADATA_PAGE_ID};
use crate::config::Config;
use crate::disk_manager::DiskManager;
use crate::errors::Error;
use crate::index::TableIndex;
use crate::pages::metadata_page::MetadataPage;
use crate::pages::RecordId;
use crate::predicate::PredicateMatcher;
use crate::table::disk::TableDiskManager;
use crate::table::table_iterator::TableIterator;
use crate::table::Table;
use crate::tuple::schema::Schema;
use crate::tuple::Tuple;
use crate::txn_manager::transaction::Transaction;
use crate::txn_manager::{ArcTransactionManager, TransactionManager};
use crate::types::Value;

/// Owner of all process-wide engine state: the buffer pool over one page
/// file, the transaction manager, the table disk manager, the catalog and
/// the in-memory indices. Created at startup, shut down (flushing dirty
/// pages and persisting the timestamp counter) at the end.
pub struct Database {
    config: Config,
    bpm: ArcBufferPool,
    txn_manager: ArcTransactionManager,
    tdm: TableDiskManager,
    catalog: Catalog,
    indices: HashMap<String, TableIndex>,
    closed: bool,
}

impl Database {
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let disk_manager = DiskManager::new(&path)?;
        let fresh = disk_manager.count_pages() == 0;

        let bpm: ArcBufferPool = Arc::new(FairMutex::new(BufferPool::new(&config, disk_manager)));
        let txn_manager: ArcTransactionManager = Arc::new(TransactionManager::new(bpm.clone()));

        if !fresh {
            let shared = bpm.lock().pin(METADATA_PAGE_ID)?;
            let next_timestamp = MetadataPage::new(&mut shared.write()).next_transaction_timestamp();
            bpm.lock().unpin(METADATA_PAGE_ID, false)?;
            txn_manager.set_next_timestamp(next_timestamp);
        }

        let catalog = Catalog::bootstrap(bpm.clone(), &txn_manager, fresh)?;

        let mut database = Self {
            tdm: TableDiskManager::new(bpm.clone()),
            bpm,
            txn_manager,
            catalog,
            config,
            indices: HashMap::new(),
            closed: false,
        };

        if fresh {
            // stamp the metadata page so a crash before the first clean
            // shutdown still finds a sane counter
            database.persist_next_timestamp()?;
        }
        database.build_indices()?;

        info!(
            "database open at {} ({} tables, {} indices)",
            path.as_ref().display(),
            database.catalog.tables().count(),
            database.indices.len()
        );
        Ok(database)
    }

    /// Rebuilds every persisted index definition by scanning its table.
    fn build_indices(&mut self) -> Result<()> {
        for def in self.catalog.index_defs().to_vec() {
            let Some(table) = self.catalog.table_by_id(def.table_id) else {
                bail!(Error::Internal(format!("index {} references unknown table", def.name)));
            };

            let mut index = TableIndex::new(def.unique);
            let mut txn = self.txn_manager.begin();
            {
                let mut iterator =
                    TableIterator::new(&self.tdm, &table, &mut txn, None, self.config.scan_page_limit);
                while let Some(tuple) = iterator.next_tuple()? {
                    let key = tuple.value(def.column_index, table.schema())?.as_key()?;
                    index.put(key, tuple.rid().page_id())?;
                }
            }
            self.txn_manager.commit(txn)?;

            self.indices.insert(def.name.clone(), index);
        }
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn buffer_pool(&self) -> &ArcBufferPool {
        &self.bpm
    }

    pub fn transaction_manager(&self) -> &ArcTransactionManager {
        &self.txn_manager
    }

    pub fn table_disk_manager(&self) -> &TableDiskManager {
        &self.tdm
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn begin(&self) -> Transaction {
        self.txn_manager.begin()
    }

    pub fn commit(&self, transaction: Transaction) -> Result<bool> {
        self.txn_manager.commit(transaction)
    }

    pub fn abort(&self, transaction: &mut Transaction) -> Result<()> {
        self.txn_manager.abort(transaction)
    }

    pub fn create_table(&mut self, txn: &mut Transaction, schema: Schema) -> Result<Arc<Table>> {
        self.catalog.create_table(txn, schema)
    }

    /// Creates an index over one column and fills it from the rows `txn`
    /// can see.
    pub fn create_index(
        &mut self,
        txn: &mut Transaction,
        table_name: &str,
        column_name: &str,
        index_name: &str,
        unique: bool,
    ) -> Result<()> {
        let def = self.catalog.create_index(txn, table_name, column_name, index_name, unique)?;
        let table = self
            .catalog
            .table(table_name)
            .expect("create_index verified the table exists");

        let mut index = TableIndex::new(def.unique);
        {
            let mut iterator =
                TableIterator::new(&self.tdm, &table, txn, None, self.config.scan_page_limit);
            while let Some(tuple) = iterator.next_tuple()? {
                let key = tuple.value(def.column_index, table.schema())?.as_key()?;
                index.put(key, tuple.rid().page_id())?;
            }
        }
        self.indices.insert(def.name, index);
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<Arc<Table>> {
        self.catalog.table(name)
    }

    pub fn index(&self, name: &str) -> Option<&TableIndex> {
        self.indices.get(name)
    }

    /// Inserts a row and keeps the table's indices in step. A duplicate key
    /// on a unique index rejects the insert before anything is written.
    pub fn insert(&mut self, txn: &mut Transaction, table: &Table, values: &[Value]) -> Result<RecordId> {
        let tuple = Tuple::new(values, table.schema())?;

        let defs = self
            .catalog
            .index_defs()
            .iter()
            .filter(|def| def.table_id == table.id())
            .cloned()
            .collect::<Vec<_>>();

        for def in &defs {
            if !def.unique {
                continue;
            }
            let key = tuple.value(def.column_index, table.schema())?.as_key()?;
            if self.indices[&def.name].get(key).is_some() {
                bail!(Error::IndexKeyViolation(key));
            }
        }

        let rid = self.tdm.insert_row(txn, table, &tuple)?;

        for def in &defs {
            let key = tuple.value(def.column_index, table.schema())?.as_key()?;
            if let Some(index) = self.indices.get_mut(&def.name) {
                index.put(key, rid.page_id())?;
            }
        }

        Ok(rid)
    }

    pub fn scan<'a>(
        &'a self,
        txn: &'a mut Transaction,
        table: &'a Table,
        predicate: Option<Box<dyn PredicateMatcher>>,
    ) -> TableIterator<'a> {
        TableIterator::new(&self.tdm, table, txn, predicate, self.config.scan_page_limit)
    }

    fn persist_next_timestamp(&self) -> Result<()> {
        let shared = self.bpm.lock().pin(METADATA_PAGE_ID)?;
        MetadataPage::new(&mut shared.write())
            .set_next_transaction_timestamp(self.txn_manager.next_timestamp());
        self.bpm.lock().unpin(METADATA_PAGE_ID, true)?;
        Ok(())
    }

    /// Clean shutdown: catalog state, timestamp counter, then every dirty
    /// page. There is no write-ahead log; this flush is the durability
    /// point.
    pub fn shutdown(mut self) -> Result<()> {
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.catalog.persist_table_state()?;
        self.persist_next_timestamp()?;
        self.bpm.lock().flush()?;

        info!("database shut down cleanly");
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("shutdown on drop failed: {e}");
        }
    }
}
