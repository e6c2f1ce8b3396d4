#[derive(Debug)]
pub enum Error {
    Internal(String),
    /// Page file read/write failed or the page id is out of range.
    DiskIO(String),
    /// Every frame in the buffer pool is pinned.
    NoFreeFrame,
    /// Unpin was attempted on a page with pin count 0.
    PageNotPinned(u32),
    /// Commit validation found a conflicting concurrent transaction.
    TransactionConflict,
    /// The transaction was aborted and accepts no further operations.
    TransactionAborted,
    /// Unique index insert with an already-present key.
    IndexKeyViolation(i64),
    TableExists(String),
    RecordTooBig(usize, usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Internal(context) => write!(f, "Internal Error: {context}."),
            Error::DiskIO(context) => write!(f, "Disk IO failed: {context}."),
            Error::NoFreeFrame => write!(f, "No free frames left to evict."),
            Error::PageNotPinned(page_id) => {
                write!(f, "Page {page_id} is not pinned, but an unpin was attempted.")
            }
            Error::TransactionConflict => {
                write!(f, "Transaction conflicts with a concurrently committed transaction.")
            }
            Error::TransactionAborted => write!(f, "Transaction was already aborted."),
            Error::IndexKeyViolation(key) => write!(f, "Key {key} already exists in index."),
            Error::TableExists(table) => write!(f, "Table {table} already exists."),
            Error::RecordTooBig(max, actual) => {
                write!(f, "Record of {actual} bytes exceeds the page limit of {max} bytes.")
            }
        }
    }
}
