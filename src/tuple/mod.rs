pub mod schema;

use anyhow::{bail, Result};

use crate::errors::Error;
use crate::pages::{RecordId, MEMORY_PAGE_ID};
use crate::txn_manager::metadata::RecordMetadata;
use crate::txn_manager::timestamp::Timestamp;
use crate::types::Value;

use schema::Schema;

/// One fixed-width row, together with where it came from. Tuples built from
/// values (not yet on any page) carry the memory sentinel as their record id.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    rid: RecordId,
    metadata: RecordMetadata,
    data: Box<[u8]>,
}

impl Tuple {
    pub fn new(values: &[Value], schema: &Schema) -> Result<Self> {
        if values.len() != schema.len() {
            bail!(Error::Internal(format!(
                "{} values for a schema of {} columns",
                values.len(),
                schema.len()
            )));
        }

        let mut data = Vec::with_capacity(schema.row_size());
        for (value, column) in values.iter().zip(schema.columns()) {
            data.extend_from_slice(&value.to_bytes(&column.ty)?);
        }

        let rid = RecordId::new(MEMORY_PAGE_ID, 0);
        Ok(Self {
            rid,
            metadata: RecordMetadata::new(rid, Timestamp::INFINITY),
            data: data.into_boxed_slice(),
        })
    }

    /// A tuple read back from a record page slot.
    pub fn from_record(rid: RecordId, metadata: RecordMetadata, payload: &[u8]) -> Self {
        Self {
            rid,
            metadata,
            data: payload.to_vec().into_boxed_slice(),
        }
    }

    pub fn rid(&self) -> RecordId {
        self.rid
    }

    pub fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn value(&self, index: usize, schema: &Schema) -> Result<Value> {
        if index >= schema.len() {
            bail!(Error::Internal(format!("column {index} out of bounds")));
        }

        let column = schema.column(index);
        let offset = schema.offset(index);
        Ok(Value::from_bytes(&column.ty, &self.data[offset..offset + column.ty.size()]))
    }

    pub fn value_of(&self, name: &str, schema: &Schema) -> Result<Value> {
        let index = schema
            .column_index(name)
            .ok_or_else(|| Error::Internal(format!("no column named {name}")))
            .map_err(anyhow::Error::msg)?;
        self.value(index, schema)
    }

    pub fn values(&self, schema: &Schema) -> Result<Vec<Value>> {
        (0..schema.len()).map(|index| self.value(index, schema)).collect()
    }
}
