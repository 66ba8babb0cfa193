use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::tables::SEQUENCES;

impl Database {
    /// Hand out the next value of a named counter, starting at 1.
    ///
    /// redb serializes write transactions, so concurrent callers always get
    /// distinct, increasing values. A value whose caller later fails is not reused.
    pub fn next_sequence(&self, name: &str) -> Result<u64, DatabaseError> {
        let write_txn = self.begin_write()?;
        let value = {
            let mut table = write_txn.open_table(SEQUENCES)?;
            let value = table.get(name)?.map(|v| v.value()).unwrap_or(1);
            table.insert(name, value + 1)?;
            value
        };
        write_txn.commit()?;
        Ok(value)
    }
}
