//! Driver seam: the connection collaborator contract.
//!
//! The core never acquires, pools, or manages connections. Each invocation
//! is handed one live [`Connection`]; statements obtained from it are
//! released by `Drop`, unconditionally, so cleanup can never mask an
//! earlier failure.

use crate::error::{Error, Result};
use crate::value::Value;

/// A SQL position a mapping is bound at: a 1-based positional index or an
/// explicit column name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlPos {
    Index(usize),
    Column(String),
}

/// One live database connection supplied by the caller.
pub trait Connection {
    fn prepare(&self, sql: &str) -> Result<Box<dyn Statement + '_>>;

    /// Prepare a stored-procedure call. Out parameters are registered on
    /// the returned statement before execution.
    fn prepare_call(&self, sql: &str) -> Result<Box<dyn Statement + '_>>;
}

/// A prepared statement or call handle.
pub trait Statement {
    fn bind(&mut self, index: usize, value: &Value) -> Result<()>;

    fn register_out(&mut self, index: usize, type_key: &str) -> Result<()>;

    fn set_fetch_size(&mut self, rows: usize) -> Result<()>;

    /// Queue the currently bound row for batched execution.
    fn add_batch(&mut self) -> Result<()>;

    /// Execute all queued rows; returns per-statement affected-row counts.
    fn execute_batch(&mut self) -> Result<Vec<u64>>;

    fn execute_update(&mut self) -> Result<u64>;

    /// Execute a read query and fetch all rows.
    fn query(&mut self) -> Result<Vec<RowData>>;

    /// Execute a stored-procedure call.
    fn execute(&mut self) -> Result<()>;

    /// Read a registered out parameter after execution.
    fn out_value(&self, index: usize) -> Result<Value>;
}

/// One fetched row: column names plus cell values in result-set order.
#[derive(Debug, Clone, PartialEq)]
pub struct RowData {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl RowData {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Cell at a 1-based result-set position.
    pub fn by_index(&self, index: usize) -> Result<&Value> {
        self.values
            .get(index.wrapping_sub(1))
            .ok_or_else(|| Error::Execution(format!("result column {} out of range", index)))
    }

    pub fn by_name(&self, name: &str) -> Result<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| &self.values[i])
            .ok_or_else(|| Error::Execution(format!("no result column named '{}'", name)))
    }

    pub fn get(&self, pos: &SqlPos) -> Result<&Value> {
        match pos {
            SqlPos::Index(i) => self.by_index(*i),
            SqlPos::Column(name) => self.by_name(name),
        }
    }

    pub fn width(&self) -> usize {
        self.values.len()
    }
}

/// In-memory scripted connection used by the engine tests.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    /// Everything a statement did, observable after the fact.
    #[derive(Debug, Default)]
    pub struct Log {
        pub prepared: Vec<String>,
        pub calls_prepared: Vec<String>,
        pub binds: Vec<(usize, Value)>,
        pub outs_registered: Vec<(usize, String)>,
        pub batches_added: usize,
        pub executes: usize,
        pub fetch_size: Option<usize>,
    }

    pub struct MockConnection {
        pub rows: Vec<RowData>,
        pub update_count: u64,
        pub out_values: HashMap<usize, Value>,
        pub fail_execute: bool,
        pub log: Rc<RefCell<Log>>,
    }

    impl MockConnection {
        pub fn new() -> Self {
            Self {
                rows: Vec::new(),
                update_count: 1,
                out_values: HashMap::new(),
                fail_execute: false,
                log: Rc::new(RefCell::new(Log::default())),
            }
        }

        pub fn with_rows(rows: Vec<RowData>) -> Self {
            let mut conn = Self::new();
            conn.rows = rows;
            conn
        }
    }

    impl Connection for MockConnection {
        fn prepare(&self, sql: &str) -> Result<Box<dyn Statement + '_>> {
            self.log.borrow_mut().prepared.push(sql.to_string());
            Ok(Box::new(MockStatement::of(self)))
        }

        fn prepare_call(&self, sql: &str) -> Result<Box<dyn Statement + '_>> {
            self.log.borrow_mut().calls_prepared.push(sql.to_string());
            Ok(Box::new(MockStatement::of(self)))
        }
    }

    pub struct MockStatement {
        rows: Vec<RowData>,
        update_count: u64,
        out_values: HashMap<usize, Value>,
        fail_execute: bool,
        log: Rc<RefCell<Log>>,
        pending: usize,
    }

    impl MockStatement {
        fn of(conn: &MockConnection) -> Self {
            Self {
                rows: conn.rows.clone(),
                update_count: conn.update_count,
                out_values: conn.out_values.clone(),
                fail_execute: conn.fail_execute,
                log: Rc::clone(&conn.log),
                pending: 0,
            }
        }

        fn fail(&self) -> Result<()> {
            if self.fail_execute {
                Err(Error::data_access(std::io::Error::other("connection reset")))
            } else {
                Ok(())
            }
        }
    }

    impl Statement for MockStatement {
        fn bind(&mut self, index: usize, value: &Value) -> Result<()> {
            self.log.borrow_mut().binds.push((index, value.clone()));
            Ok(())
        }

        fn register_out(&mut self, index: usize, type_key: &str) -> Result<()> {
            self.log
                .borrow_mut()
                .outs_registered
                .push((index, type_key.to_string()));
            Ok(())
        }

        fn set_fetch_size(&mut self, rows: usize) -> Result<()> {
            self.log.borrow_mut().fetch_size = Some(rows);
            Ok(())
        }

        fn add_batch(&mut self) -> Result<()> {
            self.log.borrow_mut().batches_added += 1;
            self.pending += 1;
            Ok(())
        }

        fn execute_batch(&mut self) -> Result<Vec<u64>> {
            self.fail()?;
            self.log.borrow_mut().executes += 1;
            let counts = vec![self.update_count; self.pending];
            self.pending = 0;
            Ok(counts)
        }

        fn execute_update(&mut self) -> Result<u64> {
            self.fail()?;
            self.log.borrow_mut().executes += 1;
            Ok(self.update_count)
        }

        fn query(&mut self) -> Result<Vec<RowData>> {
            self.fail()?;
            self.log.borrow_mut().executes += 1;
            Ok(self.rows.clone())
        }

        fn execute(&mut self) -> Result<()> {
            self.fail()?;
            self.log.borrow_mut().executes += 1;
            Ok(())
        }

        fn out_value(&self, index: usize) -> Result<Value> {
            self.out_values
                .get(&index)
                .cloned()
                .ok_or_else(|| Error::Execution(format!("no out value at {}", index)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_row_access() {
        let row = RowData::new(
            vec!["id".into(), "name".into()],
            vec![Value::Int(7), Value::Str("ada".into())],
        );
        assert_eq!(row.by_index(1).unwrap(), &Value::Int(7));
        assert_eq!(row.by_name("name").unwrap(), &Value::Str("ada".into()));
        assert_eq!(
            row.get(&SqlPos::Column("name".into())).unwrap(),
            &Value::Str("ada".into())
        );
        assert!(row.by_index(3).is_err());
        assert!(row.by_name("missing").is_err());
    }
}
