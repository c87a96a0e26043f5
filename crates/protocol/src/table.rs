//! Table payloads and the semantic-tag transform applied to argument lists.
//!
//! A table travels inside a frame as CBOR tag 80 wrapping a byte string that
//! holds an Arrow IPC stream. [`table2tag`] prepares outbound arguments,
//! [`tag2table`] rehydrates inbound ones. Only the top level of an argument
//! list is inspected; values nested deeper pass through untouched.

use std::io::Cursor;

use arrow_array::RecordBatch;
use arrow_ipc::reader::StreamReader;
use arrow_ipc::writer::StreamWriter;
use arrow_schema::SchemaRef;
use ciborium::Value;

use crate::error::{RembusError, Result};

/// Semantic tag marking an Arrow IPC table buffer.
pub const TABLE_TAG: u64 = 80;

/// A columnar table: one schema shared by zero or more record batches.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Table {
    /// Creates a table holding a single record batch.
    pub fn new(batch: RecordBatch) -> Self {
        Self {
            schema: batch.schema(),
            batches: vec![batch],
        }
    }

    /// Creates a table from a schema and batches sharing that schema.
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        if let Some(batch) = batches.iter().find(|b| b.schema() != schema) {
            return Err(RembusError::Validation(format!(
                "record batch schema {:?} does not match table schema",
                batch.schema()
            )));
        }
        Ok(Self { schema, batches })
    }

    /// Returns the table schema.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Returns the record batches.
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Total number of rows across batches.
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Archives the table as an Arrow IPC stream.
    pub fn to_ipc(&self) -> Result<Vec<u8>> {
        let mut writer = StreamWriter::try_new(Vec::new(), &self.schema)?;
        for batch in &self.batches {
            writer.write(batch)?;
        }
        writer.finish()?;
        Ok(writer.into_inner()?)
    }

    /// Rehydrates a table from an Arrow IPC stream.
    pub fn from_ipc(bytes: &[u8]) -> Result<Self> {
        let reader = StreamReader::try_new(Cursor::new(bytes), None)
            .map_err(|e| RembusError::Deserialization(format!("arrow: {}", e)))?;
        let schema = reader.schema();
        let batches = reader
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RembusError::Deserialization(format!("arrow: {}", e)))?;
        Ok(Self { schema, batches })
    }
}

/// A single argument or result value as seen by application code.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Any CBOR value other than a table.
    Data(Value),
    /// A columnar table.
    Table(Table),
}

impl Arg {
    /// The CBOR null value.
    pub fn null() -> Self {
        Arg::Data(Value::Null)
    }

    /// Returns the inner CBOR value, if this is not a table.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Arg::Data(v) => Some(v),
            Arg::Table(_) => None,
        }
    }

    /// Returns the inner table, if any.
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Arg::Table(t) => Some(t),
            Arg::Data(_) => None,
        }
    }

    /// Returns true for the CBOR null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Arg::Data(Value::Null))
    }

    /// Converts to the wire representation, archiving tables.
    pub fn into_tagged(self) -> Result<Value> {
        match self {
            Arg::Data(v) => Ok(v),
            Arg::Table(t) => Ok(Value::Tag(TABLE_TAG, Box::new(Value::Bytes(t.to_ipc()?)))),
        }
    }

    /// Converts from the wire representation, rehydrating tagged tables.
    pub fn from_tagged(value: Value) -> Result<Self> {
        match value {
            Value::Tag(TABLE_TAG, inner) => match *inner {
                Value::Bytes(bytes) => Ok(Arg::Table(Table::from_ipc(&bytes)?)),
                other => Err(RembusError::Deserialization(format!(
                    "table tag must wrap a byte string, got {:?}",
                    other
                ))),
            },
            other => Ok(Arg::Data(other)),
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Data(value)
    }
}

impl From<Table> for Arg {
    fn from(table: Table) -> Self {
        Arg::Table(table)
    }
}

impl From<RecordBatch> for Arg {
    fn from(batch: RecordBatch) -> Self {
        Arg::Table(Table::new(batch))
    }
}

macro_rules! impl_arg_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Arg {
                fn from(v: $t) -> Self {
                    Arg::Data(Value::from(v))
                }
            }
        )*
    };
}

impl_arg_from!(bool, i32, i64, u32, u64, f64, String, &str, Vec<u8>);

/// Wraps every table in `args` into its tagged archive form.
pub fn table2tag(args: Vec<Arg>) -> Result<Vec<Value>> {
    args.into_iter().map(Arg::into_tagged).collect()
}

/// Rehydrates every tag-80 value in `values` into a table.
pub fn tag2table(values: Vec<Value>) -> Result<Vec<Arg>> {
    values.into_iter().map(Arg::from_tagged).collect()
}
