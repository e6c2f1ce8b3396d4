pub mod b_plus_tree;

use std::collections::BTreeSet;

use anyhow::{bail, Result};

use crate::errors::Error;
use crate::pages::PageId;
use crate::table::TableId;

use b_plus_tree::{BPlusTree, NonUnique, Unique};

/// Persisted description of an index; the tree itself is rebuilt from the
/// table at boot.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    pub id: i32,
    pub name: String,
    pub table_id: TableId,
    pub column_index: usize,
    pub unique: bool,
}

/// Executor-facing index over one integer column: key -> ids of the pages
/// holding matching records.
pub enum TableIndex {
    Unique(BPlusTree<i64, PageId, Unique>),
    NonUnique(BPlusTree<i64, PageId, NonUnique>),
}

impl TableIndex {
    pub fn new(unique: bool) -> Self {
        if unique {
            TableIndex::Unique(BPlusTree::new())
        } else {
            TableIndex::NonUnique(BPlusTree::new())
        }
    }

    pub fn is_unique(&self) -> bool {
        matches!(self, TableIndex::Unique(_))
    }

    /// Registers `page_id` under `key`. A duplicate key on a unique index
    /// is rejected with [`Error::IndexKeyViolation`].
    pub fn put(&mut self, key: i64, page_id: PageId) -> Result<()> {
        match self {
            TableIndex::Unique(tree) => {
                if tree.get(&key).is_some() {
                    bail!(Error::IndexKeyViolation(key));
                }
                tree.put(key, page_id);
            }
            TableIndex::NonUnique(tree) => tree.put(key, page_id),
        }
        Ok(())
    }

    pub fn get(&self, key: i64) -> Option<BTreeSet<PageId>> {
        match self {
            TableIndex::Unique(tree) => tree.get(&key).map(|page_id| BTreeSet::from([page_id])),
            TableIndex::NonUnique(tree) => tree.get(&key),
        }
    }

    pub fn get_range(&self, key_from: i64, key_to: i64) -> Option<BTreeSet<PageId>> {
        match self {
            TableIndex::Unique(tree) => tree.get_range(&key_from, &key_to),
            TableIndex::NonUnique(tree) => tree.get_range(&key_from, &key_to),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_index_rejects_duplicates() -> Result<()> {
        let mut index = TableIndex::new(true);
        index.put(10, 3)?;

        let err = index.put(10, 4).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::IndexKeyViolation(10))
        ));

        assert_eq!(index.get(10), Some(BTreeSet::from([3])));
        Ok(())
    }

    #[test]
    fn test_non_unique_index_accumulates_pages() -> Result<()> {
        let mut index = TableIndex::new(false);
        index.put(10, 3)?;
        index.put(10, 4)?;
        index.put(11, 3)?;

        assert_eq!(index.get(10), Some(BTreeSet::from([3, 4])));
        assert_eq!(index.get_range(10, 11), Some(BTreeSet::from([3, 4])));
        Ok(())
    }
}
