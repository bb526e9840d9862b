//! Shared fixtures for the sqlhelper integration tests.
//!
//! Two backends are used:
//!
//! - in-memory `SQLite` through the built-in driver, for real SQL semantics
//! - [`ScriptedDriver`], an in-process fake that emulates a stored procedure
//!   and records what the connection layer asked of it
//!
//! ```bash
//! cargo test -p sqlhelper --test connection_tests
//! cargo test -p sqlhelper --test callable_tests
//! ```

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use sqlhelper::driver::{
    Driver, NativeConnection, NativeCursor, NativeStatement, count_placeholders,
};
use sqlhelper::error::{DriverError, DriverResult};
use sqlhelper::{
    ConnectOptions, Connection, DriverRegistry, ParamKey, ProcedureBind, Row, Value,
};

// ============================================================================
// SQLite fixtures
// ============================================================================

/// Two rows, `(1, 'one')` and `(2, 'two')`.
pub const GET_ONE_TWO: &str = "select 1 as a, 'one' as b union all select 2, 'two' order by a";

pub fn sqlite_options() -> ConnectOptions {
    ConnectOptions::new("sqlite", ":memory:")
}

pub fn sqlite_memory() -> Connection {
    Connection::open(sqlite_options()).expect("in-memory sqlite")
}

/// An on-disk database, so that clones see each other's data.
pub fn sqlite_file(dir: &tempfile::TempDir) -> ConnectOptions {
    let path = dir.path().join("test.db");
    ConnectOptions::new("sqlite", path.to_string_lossy())
}

pub fn reset_test_table(conn: &Connection) {
    conn.update("drop table if exists t").unwrap();
    conn.update("create table t (a int primary key, b varchar(100))")
        .unwrap();
}

pub fn count(conn: &Connection) -> i64 {
    conn.query("select count(*) from t").unwrap()[0]
        .get_as::<i64>(0)
        .unwrap()
}

pub fn check_one_two(rows: &[Row]) {
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get_as::<i64>(0).unwrap(), 1);
    assert_eq!(rows[0]["b"], Value::from("one"));
    assert_eq!(rows[1].get_by_name_as::<i64>("A").unwrap(), 2);
    assert_eq!(rows[1][1], Value::from("two"));
}

// ============================================================================
// Scripted driver
// ============================================================================

pub const SCRIPTED: &str = "scripted";

/// Parameters of the emulated procedure `proc_test`, in declaration order.
///
/// `io1` returns `i2 * io1`, `io2` echoes its input, `o1` returns a fixed
/// float and `o2` returns `i1`.
static PROC_PARAMS: [&str; 7] = ["i1", "i2", "io1", "io2", "n1", "o1", "o2"];

/// Procedure call with every parameter bound.
pub const PROC_CALL: &str = "call proc_test(?, ?, ?, ?, ?, ?, ?)";

/// Procedure call with `i1` given as a literal.
pub const PROC_CALL_HOWDY: &str = "call proc_test('howdy', ?, ?, ?, ?, ?, ?)";

pub const O1_VALUE: f64 = 3.5;

/// What the connection layer did to the scripted backend.
#[derive(Debug, Default)]
pub struct Journal {
    pub connections_opened: usize,
    pub connections_closed: usize,
    pub prepared: Vec<String>,
    pub statements_closed: usize,
    pub fetch_sizes: Vec<(String, Option<u32>)>,
    pub open_cursors: usize,
    pub calls: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

pub type SharedJournal = Arc<Mutex<Journal>>;

#[derive(Debug, Default)]
pub struct ScriptedDriver {
    journal: SharedJournal,
}

impl ScriptedDriver {
    pub fn journal(&self) -> SharedJournal {
        Arc::clone(&self.journal)
    }
}

impl Driver for ScriptedDriver {
    fn name(&self) -> &str {
        SCRIPTED
    }

    fn connect(&self, options: &ConnectOptions) -> DriverResult<Box<dyn NativeConnection>> {
        if options.url() == "refuse" {
            return Err(DriverError::new("connection refused").with_code(-10709));
        }
        self.journal.lock().connections_opened += 1;
        Ok(Box::new(ScriptedConnection {
            journal: Arc::clone(&self.journal),
            auto_commit: true,
            closed: false,
        }))
    }
}

/// Connection through a registry holding only the scripted driver.
pub fn scripted() -> (Connection, SharedJournal) {
    scripted_with(ConnectOptions::new(SCRIPTED, "scripted://local"))
}

pub fn scripted_with(options: ConnectOptions) -> (Connection, SharedJournal) {
    let driver = ScriptedDriver::default();
    let journal = driver.journal();
    let mut registry = DriverRegistry::new();
    registry.register(Arc::new(driver));
    let conn = Connection::open_with(&registry, options).expect("scripted connection");
    (conn, journal)
}

#[derive(Debug)]
struct ScriptedConnection {
    journal: SharedJournal,
    auto_commit: bool,
    closed: bool,
}

fn is_bad_sql(sql: &str) -> bool {
    sql.trim_start().to_ascii_lowercase().starts_with("xxx")
}

fn syntax_error(sql: &str) -> DriverError {
    DriverError::new(format!("sql syntax error: near \"{sql}\"")).with_code(257)
}

impl NativeConnection for ScriptedConnection {
    fn prepare(&mut self, sql: &str) -> DriverResult<Box<dyn NativeStatement>> {
        if is_bad_sql(sql) {
            return Err(syntax_error(sql));
        }
        self.journal.lock().prepared.push(sql.to_string());
        Ok(Box::new(ScriptedStatement {
            journal: Arc::clone(&self.journal),
            sql: sql.to_string(),
            parameter_count: count_placeholders(sql),
            closed: false,
        }))
    }

    fn execute_batch(&mut self, statements: &[String]) -> DriverResult<Vec<u64>> {
        if let Some(bad) = statements.iter().find(|sql| is_bad_sql(sql)) {
            return Err(syntax_error(bad));
        }
        Ok(vec![1; statements.len()])
    }

    fn set_auto_commit(&mut self, enabled: bool) -> DriverResult<()> {
        self.auto_commit = enabled;
        Ok(())
    }

    fn auto_commit(&self) -> DriverResult<bool> {
        Ok(self.auto_commit)
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.journal.lock().commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.journal.lock().rollbacks += 1;
        Ok(())
    }

    fn close(&mut self) -> DriverResult<()> {
        if !self.closed {
            self.closed = true;
            self.journal.lock().connections_closed += 1;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[derive(Debug)]
struct ScriptedStatement {
    journal: SharedJournal,
    sql: String,
    parameter_count: usize,
    closed: bool,
}

impl ScriptedStatement {
    fn check_params(&self, given: usize) -> DriverResult<()> {
        if given == self.parameter_count {
            Ok(())
        } else {
            Err(DriverError::new(format!(
                "wrong number of parameters: expected {}, got {given}",
                self.parameter_count
            )))
        }
    }

    /// Names of the bindable parameters for this call text.
    fn procedure_params(&self) -> &'static [&'static str] {
        if self.sql.contains("'howdy'") {
            &PROC_PARAMS[1..]
        } else {
            &PROC_PARAMS
        }
    }

    fn run_procedure(&self, binds: &[ProcedureBind]) -> DriverResult<Vec<(ParamKey, Value)>> {
        let names = self.procedure_params();
        let resolve = |key: &ParamKey| -> DriverResult<&'static str> {
            match key {
                ParamKey::Position(p) => names
                    .get(p.wrapping_sub(1))
                    .copied()
                    .ok_or_else(|| DriverError::new(format!("no parameter at position {p}"))),
                ParamKey::Name(name) => names
                    .iter()
                    .copied()
                    .find(|n| *n == name.as_str())
                    .ok_or_else(|| DriverError::new(format!("unknown parameter '{name}'"))),
            }
        };

        let mut inputs = std::collections::HashMap::new();
        if names.len() < PROC_PARAMS.len() {
            inputs.insert("i1", Value::from("howdy"));
        }
        for bind in binds {
            if let Some(value) = bind.param.input_value() {
                inputs.insert(resolve(&bind.key)?, value.clone());
            }
        }

        let int = |name: &str| inputs.get(name).and_then(Value::as_i64).unwrap_or(0);
        let mut outputs = Vec::new();
        for bind in binds.iter().filter(|b| b.param.is_output()) {
            let value = match resolve(&bind.key)? {
                "io1" => Value::Int(int("i2") * int("io1")),
                "io2" => inputs.get("io2").cloned().unwrap_or(Value::Null),
                "o1" => Value::Double(O1_VALUE),
                "o2" => inputs.get("i1").cloned().unwrap_or(Value::Null),
                other => {
                    return Err(DriverError::new(format!("parameter '{other}' is IN only")));
                }
            };
            outputs.push((bind.key.clone(), value));
        }
        Ok(outputs)
    }
}

impl NativeStatement for ScriptedStatement {
    fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    fn set_fetch_size(&mut self, fetch_size: Option<u32>) -> DriverResult<()> {
        if fetch_size == Some(0) {
            return Err(DriverError::new("fetch size must be positive"));
        }
        self.journal
            .lock()
            .fetch_sizes
            .push((self.sql.clone(), fetch_size));
        Ok(())
    }

    fn query(&mut self, params: &[Value]) -> DriverResult<Box<dyn NativeCursor>> {
        self.check_params(params.len())?;
        let rows = match self.sql.as_str() {
            "select 1" => vec![vec![Value::Int(1)]],
            "select ?" => vec![params.to_vec()],
            "select 1 union all select 2" => vec![vec![Value::Int(1)], vec![Value::Int(2)]],
            _ => Vec::new(),
        };
        self.journal.lock().open_cursors += 1;
        Ok(Box::new(ScriptedCursor {
            journal: Arc::clone(&self.journal),
            columns: vec!["1".to_string()],
            rows: rows.into_iter(),
            closed: false,
        }))
    }

    fn update(&mut self, params: &[Value]) -> DriverResult<u64> {
        self.check_params(params.len())?;
        Ok(1)
    }

    fn execute_batch(&mut self, batch: &[Vec<Value>]) -> DriverResult<Vec<u64>> {
        for params in batch {
            self.check_params(params.len())?;
        }
        Ok(vec![1; batch.len()])
    }

    fn call(&mut self, binds: &[ProcedureBind]) -> DriverResult<Vec<(ParamKey, Value)>> {
        self.journal.lock().calls += 1;
        self.check_params(binds.len())?;
        self.run_procedure(binds)
    }

    fn close(&mut self) -> DriverResult<()> {
        if !self.closed {
            self.closed = true;
            self.journal.lock().statements_closed += 1;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[derive(Debug)]
struct ScriptedCursor {
    journal: SharedJournal,
    columns: Vec<String>,
    rows: std::vec::IntoIter<Vec<Value>>,
    closed: bool,
}

impl NativeCursor for ScriptedCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> DriverResult<Option<Vec<Value>>> {
        Ok(self.rows.next())
    }

    fn close(&mut self) -> DriverResult<()> {
        if !self.closed {
            self.closed = true;
            let mut journal = self.journal.lock();
            journal.open_cursors = journal.open_cursors.saturating_sub(1);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
