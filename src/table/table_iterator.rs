use std::collections::VecDeque;

use anyhow::Result;

use crate::pages::{PageId, INVALID_PAGE_ID};
use crate::predicate::{AlwaysTrue, PredicateMatcher};
use crate::tuple::Tuple;
use crate::txn_manager::transaction::{ReadSetItem, ScanSetItem, Transaction};

use super::disk::TableDiskManager;
use super::Table;

/// Volcano-style scan over a table's page chain. Buffers the visible tuples
/// of up to `page_limit` pages at a time and releases every pin before a
/// tuple is handed out, so a long scan never holds more than one chain page
/// plus the version pages of the page it is currently decoding.
///
/// Creating the iterator registers the scan (table + predicate) in the
/// transaction's scan set; every tuple it yields lands in the read set.
pub struct TableIterator<'a> {
    tdm: &'a TableDiskManager,
    table: &'a Table,
    txn: &'a mut Transaction,
    predicate: Option<Box<dyn PredicateMatcher>>,
    next_page_id: PageId,
    buffer: VecDeque<Tuple>,
    page_limit: usize,
}

impl<'a> TableIterator<'a> {
    pub fn new(
        tdm: &'a TableDiskManager,
        table: &'a Table,
        txn: &'a mut Transaction,
        predicate: Option<Box<dyn PredicateMatcher>>,
        page_limit: usize,
    ) -> Self {
        let registered: Box<dyn PredicateMatcher> = match &predicate {
            Some(matcher) => matcher.boxed_clone(),
            None => Box::new(AlwaysTrue),
        };
        txn.add_to_scan_set(ScanSetItem::new(table.id(), table.schema().clone(), registered));

        Self {
            tdm,
            next_page_id: table.page_id(),
            table,
            txn,
            predicate,
            buffer: VecDeque::new(),
            page_limit: page_limit.max(1),
        }
    }

    pub fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        while self.buffer.is_empty() && self.next_page_id != INVALID_PAGE_ID {
            self.fill()?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Reads chain pages until something lands in the buffer, bounded by
    /// `page_limit` pages per call.
    fn fill(&mut self) -> Result<()> {
        let mut pages_scanned = 0;

        while self.buffer.is_empty()
            && self.next_page_id != INVALID_PAGE_ID
            && pages_scanned < self.page_limit
        {
            let page_id = self.next_page_id;
            let shared = self.tdm.bpm().lock().pin(page_id)?;

            let (rows, extra_pages) = {
                let mut page = shared.write();
                let result = self.tdm.read_rows(&mut page, self.txn, self.table.schema())?;
                self.next_page_id = page.next_page_id();
                result
            };

            // tuples are copies at this point, give the pins back
            for extra_page in extra_pages {
                self.tdm.bpm().lock().unpin(extra_page, false)?;
            }
            self.tdm.bpm().lock().unpin(page_id, false)?;
            pages_scanned += 1;

            for tuple in rows {
                self.txn
                    .add_to_read_set(ReadSetItem::new(tuple.metadata().original_rid(), tuple.rid()));

                let keep = self
                    .predicate
                    .as_ref()
                    .map_or(true, |matcher| matcher.matches(&tuple, self.table.schema()));
                if keep {
                    self.buffer.push_back(tuple);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::disk::tests::{make_table, test_fixture, users_schema};
    use super::*;
    use crate::predicate::{ColumnValueMatcher, Comparison};
    use crate::types::Value;

    #[test]
    fn test_scan_filters_and_records_reads() -> Result<()> {
        let fixture = test_fixture(8);
        let schema = users_schema();
        let table = make_table(&fixture, 1, schema.clone())?;

        let mut writer = fixture.txn_manager.begin();
        for (id, age) in [(1, 10), (2, 30), (3, 17)] {
            let tuple = Tuple::new(&[Value::Int(id), Value::Int(age)], &schema)?;
            fixture.tdm.insert_row(&mut writer, &table, &tuple)?;
        }
        assert!(fixture.txn_manager.commit(writer)?);

        let mut txn = fixture.txn_manager.begin();
        let minors: Box<dyn PredicateMatcher> =
            Box::new(ColumnValueMatcher::new(1, Comparison::Lt, Value::Int(18)));
        let mut iterator = TableIterator::new(&fixture.tdm, &table, &mut txn, Some(minors), 64);

        let mut ids = Vec::new();
        while let Some(tuple) = iterator.next_tuple()? {
            ids.push(tuple.value_of("id", &schema)?);
        }
        assert_eq!(ids, vec![Value::Int(1), Value::Int(3)]);

        // all three visible tuples were read, the filter applies afterwards
        assert_eq!(txn.read_set().len(), 3);
        assert_eq!(txn.scan_set().len(), 1);

        // nothing stayed pinned
        assert_eq!(fixture.bpm.lock().pin_count(table.page_id()), Some(0));
        assert!(fixture.txn_manager.commit(txn)?);
        Ok(())
    }
}
