//! SAP HANA adapter backed by `hdbconnect`.
//!
//! hdbconnect binds parameters through serde, so [`Value`]s are converted to
//! a private serializable mirror before each execution. Properties prefixed
//! with `hana.` are passed as URL options (`hana.client_locale` becomes
//! `?client_locale=...`).

use std::sync::Arc;

use hdbconnect::HdbValue;
use parking_lot::Mutex;
use tracing::debug;
use url::Url;

use super::{Driver, NativeConnection, NativeCursor, NativeStatement, count_placeholders};
use crate::config::ConnectOptions;
use crate::error::{DriverError, DriverResult};
use crate::types::{ParamKey, ProcedureBind, Value};

const OPTION_PREFIX: &str = "hana.";

/// Driver for SAP HANA. URLs use the `hdbsql://host:port` form; user and
/// password from the options are merged into the URL. `timeout` becomes the
/// read timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct HanaDriver;

impl Driver for HanaDriver {
    fn name(&self) -> &str {
        "hana"
    }

    fn connect(&self, options: &ConnectOptions) -> DriverResult<Box<dyn NativeConnection>> {
        let url = connect_url(options)?;
        let conn = hdbconnect::Connection::new(url.as_str())?;
        if let Some(timeout) = options.timeout() {
            conn.set_read_timeout(Some(timeout))?;
        }
        Ok(Box::new(HanaConnection {
            inner: Arc::new(Mutex::new(ConnectionInner::Connected(conn))),
            auto_commit: true,
        }))
    }
}

#[derive(Debug)]
enum ConnectionInner {
    Connected(hdbconnect::Connection),
    Disconnected,
}

type SharedConnection = Arc<Mutex<ConnectionInner>>;

fn with_connection<T>(
    shared: &SharedConnection,
    f: impl FnOnce(&mut hdbconnect::Connection) -> hdbconnect::HdbResult<T>,
) -> DriverResult<T> {
    match &mut *shared.lock() {
        ConnectionInner::Connected(conn) => Ok(f(conn)?),
        ConnectionInner::Disconnected => Err(DriverError::new("connection is closed")),
    }
}

#[derive(Debug)]
struct HanaConnection {
    inner: SharedConnection,
    // hdbconnect connects in auto-commit mode
    auto_commit: bool,
}

impl NativeConnection for HanaConnection {
    fn prepare(&mut self, sql: &str) -> DriverResult<Box<dyn NativeStatement>> {
        let statement = with_connection(&self.inner, |conn| conn.prepare(sql))?;
        Ok(Box::new(HanaStatement {
            shared: Arc::clone(&self.inner),
            statement: Some(statement),
            parameter_count: count_placeholders(sql),
            fetch_size: None,
        }))
    }

    fn execute_batch(&mut self, statements: &[String]) -> DriverResult<Vec<u64>> {
        with_connection(&self.inner, |conn| {
            statements
                .iter()
                .map(|sql| conn.dml(sql.as_str()).map(|n| n as u64))
                .collect()
        })
    }

    fn set_auto_commit(&mut self, enabled: bool) -> DriverResult<()> {
        with_connection(&self.inner, |conn| conn.set_auto_commit(enabled))?;
        self.auto_commit = enabled;
        Ok(())
    }

    fn auto_commit(&self) -> DriverResult<bool> {
        if self.is_closed() {
            return Err(DriverError::new("connection is closed"));
        }
        Ok(self.auto_commit)
    }

    fn commit(&mut self) -> DriverResult<()> {
        with_connection(&self.inner, |conn| conn.commit())
    }

    fn rollback(&mut self) -> DriverResult<()> {
        with_connection(&self.inner, |conn| conn.rollback())
    }

    fn close(&mut self) -> DriverResult<()> {
        let previous = std::mem::replace(&mut *self.inner.lock(), ConnectionInner::Disconnected);
        if matches!(previous, ConnectionInner::Connected(_)) {
            debug!("closing hana connection");
        }
        drop(previous);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        matches!(*self.inner.lock(), ConnectionInner::Disconnected)
    }
}

#[derive(Debug)]
struct HanaStatement {
    shared: SharedConnection,
    statement: Option<hdbconnect::PreparedStatement>,
    parameter_count: usize,
    fetch_size: Option<u32>,
}

impl HanaStatement {
    fn statement(&mut self) -> DriverResult<&mut hdbconnect::PreparedStatement> {
        self.statement
            .as_mut()
            .ok_or_else(|| DriverError::new("statement is closed"))
    }

    fn execute(&mut self, params: &[Value]) -> DriverResult<hdbconnect::HdbResponse> {
        let binds: Vec<BindValue> = params.iter().map(BindValue::from).collect();
        let statement = self.statement()?;
        let response = if binds.is_empty() {
            statement.execute(&())?
        } else {
            statement.execute(&binds)?
        };
        Ok(response)
    }
}

impl NativeStatement for HanaStatement {
    fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    fn set_fetch_size(&mut self, fetch_size: Option<u32>) -> DriverResult<()> {
        self.statement()?;
        self.fetch_size = fetch_size;
        Ok(())
    }

    fn query(&mut self, params: &[Value]) -> DriverResult<Box<dyn NativeCursor>> {
        if let Some(fetch_size) = self.fetch_size {
            // Fetch size is a connection-wide setting in hdbconnect.
            with_connection(&self.shared, |conn| conn.set_fetch_size(fetch_size))?;
        }
        let result_set = self.execute(params)?.into_result_set()?;
        let columns = result_set
            .metadata()
            .iter()
            .map(|f| f.columnname().to_string())
            .collect();
        Ok(Box::new(HanaCursor {
            columns,
            result_set: Some(result_set),
        }))
    }

    fn update(&mut self, params: &[Value]) -> DriverResult<u64> {
        let counts = affected_rows(self.execute(params)?)?;
        Ok(counts.iter().sum())
    }

    fn execute_batch(&mut self, batch: &[Vec<Value>]) -> DriverResult<Vec<u64>> {
        let statement = self.statement()?;
        for params in batch {
            let binds: Vec<BindValue> = params.iter().map(BindValue::from).collect();
            statement.add_batch(&binds)?;
        }
        affected_rows(statement.execute_batch()?)
    }

    fn call(&mut self, binds: &[ProcedureBind]) -> DriverResult<Vec<(ParamKey, Value)>> {
        let inputs: Vec<Value> = binds
            .iter()
            .filter_map(|b| b.param.input_value().cloned())
            .collect();
        let outputs = self.execute(&inputs)?.into_output_parameters()?;
        let keys = binds.iter().filter(|b| b.param.is_output()).map(|b| b.key.clone());
        Ok(keys
            .zip(outputs.into_values())
            .map(|(key, value)| (key, value_from_hana(value)))
            .collect())
    }

    fn close(&mut self) -> DriverResult<()> {
        self.statement = None;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.statement.is_none() || matches!(*self.shared.lock(), ConnectionInner::Disconnected)
    }
}

#[derive(Debug)]
struct HanaCursor {
    columns: Vec<String>,
    result_set: Option<hdbconnect::ResultSet>,
}

impl NativeCursor for HanaCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> DriverResult<Option<Vec<Value>>> {
        let Some(result_set) = self.result_set.as_mut() else {
            return Ok(None);
        };
        match result_set.next() {
            Some(row) => {
                let row = row?;
                let values = (0..row.len()).map(|i| value_from_hana(row[i].clone())).collect();
                Ok(Some(values))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) -> DriverResult<()> {
        self.result_set = None;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.result_set.is_none()
    }
}

/// Serializable parameter value for hdbconnect prepared statements.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(untagged)]
enum BindValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl From<&Value> for BindValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(v) => Self::Bool(*v),
            Value::Int(v) => Self::Int(*v),
            Value::Double(v) => Self::Float(*v),
            Value::Text(v) => Self::String(v.clone()),
            Value::Bytes(v) => Self::Bytes(v.clone()),
            temporal @ (Value::Date(_) | Value::Time(_) | Value::Timestamp(_)) => {
                Self::String(temporal.to_string())
            }
        }
    }
}

/// The URL with credentials merged in and `hana.*` properties appended as
/// query options.
fn connect_url(options: &ConnectOptions) -> DriverResult<String> {
    let url = options
        .url_with_credentials()
        .map_err(|e| DriverError::new(e.to_string()))?;
    let mut hana_options = options
        .properties()
        .iter()
        .filter_map(|(key, value)| Some((key.strip_prefix(OPTION_PREFIX)?, value)))
        .peekable();
    if hana_options.peek().is_none() {
        return Ok(url);
    }
    let mut url =
        Url::parse(&url).map_err(|e| DriverError::new(format!("Invalid connection URL: {e}")))?;
    url.query_pairs_mut().extend_pairs(hana_options);
    Ok(url.into())
}

/// Per-row affected counts of a DML response.
fn affected_rows(response: hdbconnect::HdbResponse) -> DriverResult<Vec<u64>> {
    row_counts(response.into_affected_rows()?)
}

fn row_counts<N>(counts: Vec<N>) -> DriverResult<Vec<u64>>
where
    u64: TryFrom<N>,
    <u64 as TryFrom<N>>::Error: std::fmt::Display,
{
    counts
        .into_iter()
        .map(|n| {
            u64::try_from(n)
                .map_err(|e| DriverError::new(format!("invalid affected-row count: {e}")))
        })
        .collect()
}

fn value_from_hana(value: HdbValue<'static>) -> Value {
    match value {
        HdbValue::NULL => Value::Null,
        HdbValue::BOOLEAN(v) => Value::Bool(v),
        HdbValue::TINYINT(v) => Value::from(v),
        HdbValue::SMALLINT(v) => Value::from(v),
        HdbValue::INT(v) => Value::from(v),
        HdbValue::BIGINT(v) => Value::Int(v),
        HdbValue::REAL(v) => Value::from(v),
        HdbValue::DOUBLE(v) => Value::Double(v),
        HdbValue::STRING(s) => Value::Text(s),
        HdbValue::BINARY(b) => Value::Bytes(b),
        HdbValue::DECIMAL(d) => Value::Text(d.to_string()),
        other => {
            let text = other.to_string();
            Value::parse_timestamp(&text).map_or(Value::Text(text), Value::Timestamp)
        }
    }
}

fn extract_hana_error_code(msg: &str) -> Option<i32> {
    // "[123]" or "Error 123:"
    if let Some(start) = msg.find('[')
        && let Some(end) = msg[start..].find(']')
        && let Ok(code) = msg[start + 1..start + end].parse::<i32>()
    {
        return Some(code);
    }
    if let Some(pos) = msg.find("Error ") {
        let rest = &msg[pos + 6..];
        if let Some(colon) = rest.find(':')
            && let Ok(code) = rest[..colon].trim().parse::<i32>()
        {
            return Some(code);
        }
    }
    None
}

impl From<hdbconnect::HdbError> for DriverError {
    fn from(err: hdbconnect::HdbError) -> Self {
        let message = err.to_string();
        let driver = match extract_hana_error_code(&message) {
            Some(code) => Self::new(message).with_code(code),
            None => Self::new(message),
        };
        driver.with_source(err)
    }
}
