//! Stored-procedure calls with IN, OUT and INOUT parameters.

use std::time::Instant;

use indexmap::IndexMap;
use tracing::debug;

use super::prepared::PreparedStatement;
use crate::connection::ExecutionKind;
use crate::error::{Error, Result};
use crate::pool::StatementId;
use crate::types::{normalize_name, CallParam, FromValue, ParamKey, ProcedureBind, Value};

/// Arguments for one [`CallableStatement::call`].
///
/// Either positional ([`arg`](Self::arg)) or named ([`named`](Self::named)),
/// never both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<CallParam>,
    named: IndexMap<String, CallParam>,
    duplicate: Option<String>,
}

impl CallArgs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next positional argument.
    #[must_use]
    pub fn arg(mut self, param: impl Into<CallParam>) -> Self {
        self.positional.push(param.into());
        self
    }

    /// Bind a named argument. A leading `:` is ignored and names are
    /// case-insensitive.
    #[must_use]
    pub fn named(mut self, name: &str, param: impl Into<CallParam>) -> Self {
        let key = normalize_name(name);
        if self.named.insert(key.clone(), param.into()).is_some() {
            self.duplicate.get_or_insert(key);
        }
        self
    }

    /// Positional arguments from an iterator.
    pub fn positional<I, P>(params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<CallParam>,
    {
        params.into_iter().fold(Self::new(), Self::arg)
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    /// Resolve into driver binds. INOUT values are coerced to their
    /// declared type.
    ///
    /// # Errors
    ///
    /// `Error::Argument` for mixed conventions, duplicate names or a
    /// failed coercion.
    pub fn into_binds(self) -> Result<Vec<ProcedureBind>> {
        if !self.positional.is_empty() && !self.named.is_empty() {
            return Err(Error::argument(
                "cannot mix positional and named stored procedure arguments",
            ));
        }
        if let Some(name) = self.duplicate {
            return Err(Error::argument(format!("parameter '{name}' bound more than once")));
        }

        let keyed = self
            .positional
            .into_iter()
            .enumerate()
            .map(|(i, param)| (ParamKey::Position(i + 1), param))
            .chain(self.named.into_iter().map(|(name, param)| (ParamKey::Name(name), param)));

        keyed
            .map(|(key, param)| {
                let param = match param {
                    CallParam::InOut(value, ty) => {
                        let coerced = ty.coerce(&value).map_err(|e| match e {
                            Error::Argument(msg) => Error::argument(format!("parameter {key}: {msg}")),
                            other => other,
                        })?;
                        CallParam::InOut(coerced, ty)
                    }
                    other => other,
                };
                Ok::<_, Error>(ProcedureBind { key, param })
            })
            .collect()
    }
}

impl<P: Into<CallParam>> FromIterator<P> for CallArgs {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self::positional(iter)
    }
}

/// OUT and INOUT values returned by a call, keyed by 1-based position or
/// by lowercase name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallResult {
    values: IndexMap<ParamKey, Value>,
}

impl CallResult {
    pub fn get(&self, key: impl Into<ParamKey>) -> Option<&Value> {
        self.values.get(&key.into())
    }

    /// Typed access.
    ///
    /// # Errors
    ///
    /// `Error::Argument` for an unknown key, or a conversion error.
    pub fn get_as<T: FromValue>(&self, key: impl Into<ParamKey>) -> Result<T> {
        let key = key.into();
        let value = self
            .values
            .get(&key)
            .ok_or_else(|| Error::argument(format!("no output parameter {key}")))?;
        T::from_value(value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, ParamKey, Value> {
        self.values.iter()
    }
}

impl FromIterator<(ParamKey, Value)> for CallResult {
    fn from_iter<I: IntoIterator<Item = (ParamKey, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// A prepared stored-procedure call.
#[derive(Debug)]
pub struct CallableStatement {
    inner: PreparedStatement,
}

impl CallableStatement {
    pub(crate) const fn new(inner: PreparedStatement) -> Self {
        Self { inner }
    }

    pub const fn id(&self) -> StatementId {
        self.inner.id()
    }

    pub fn sql(&self) -> String {
        self.inner.sql()
    }

    pub fn parameter_count(&self) -> usize {
        self.inner.parameter_count()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn fetch_size(&self) -> Option<u32> {
        self.inner.fetch_size()
    }

    /// # Errors
    ///
    /// `Error::StatementClosed`, or the driver's error.
    pub fn set_fetch_size(&self, fetch_size: impl Into<Option<u32>>) -> Result<()> {
        self.inner.set_fetch_size(fetch_size)
    }

    /// The underlying prepared statement, for queries and batches.
    pub const fn as_prepared(&self) -> &PreparedStatement {
        &self.inner
    }

    /// Bind `args`, execute the procedure and collect its output values.
    ///
    /// Argument errors are reported before anything reaches the driver.
    ///
    /// # Errors
    ///
    /// `Error::StatementClosed`, `Error::Argument` or the driver's error.
    pub fn call(&self, args: CallArgs) -> Result<CallResult> {
        self.inner.ensure_open()?;
        let binds = args.into_binds()?;
        let started = Instant::now();

        let mut core = self.inner.core().lock();
        debug!(statement_id = %self.id(), binds = binds.len(), "calling procedure");
        let result = core
            .native_mut()
            .and_then(|native| Ok(native.call(&binds)?))
            .map(|outputs| outputs.into_iter().collect::<CallResult>());
        self.inner
            .shared()
            .observe(ExecutionKind::Call, core.sql(), started, result, |_| 1)
    }

    /// # Errors
    ///
    /// The driver's close error.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }
}
