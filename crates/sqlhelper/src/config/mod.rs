//! Connection options.
//!
//! Options come from the builder, from loose key/value pairs, from a TOML
//! file or from `SQLHELPER_*` environment variables. Later sources override
//! earlier ones when chained through the builder.

mod env;
mod file;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

pub use env::{load_from_env, load_from_lookup};
pub use file::{find_config_file, from_toml_str, load_from_file};

use crate::constants::MAX_STATEMENT_NESTING_LEVEL;
use crate::error::{Error, Result};

/// A string whose `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
struct Secret(String);

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"***\"")
    }
}

/// Everything needed to open one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    driver: String,
    url: String,
    user: Option<String>,
    password: Option<Secret>,
    timeout: Option<Duration>,
    max_nesting_depth: usize,
    properties: BTreeMap<String, String>,
}

impl ConnectOptions {
    /// Options with just a driver and URL.
    pub fn new(driver: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            url: url.into(),
            user: None,
            password: None,
            timeout: None,
            max_nesting_depth: MAX_STATEMENT_NESTING_LEVEL,
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn builder() -> ConnectOptionsBuilder {
        ConnectOptionsBuilder::default()
    }

    /// Build options from string keys. A leading `:` on a key is ignored
    /// and keys are matched case-insensitively. Unknown keys become
    /// driver pass-through properties.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when `driver` or `url` is missing or a
    /// numeric option does not parse.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut builder = Self::builder();
        for (key, value) in pairs {
            builder = builder.option(key.as_ref(), value.into())?;
        }
        builder.build()
    }

    /// Load options from a TOML file with a `[connection]` table.
    ///
    /// # Errors
    ///
    /// Unreadable or malformed files, or incomplete options.
    pub fn from_file(path: &Path) -> Result<Self> {
        load_from_file(path, Self::builder())?.build()
    }

    /// Load options from `SQLHELPER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Malformed values or incomplete options.
    pub fn from_env() -> Result<Self> {
        load_from_env(Self::builder())?.build()
    }

    /// Layered loading: `path` (or the first file [`find_config_file`]
    /// reports) then `SQLHELPER_*` overrides on top.
    ///
    /// # Errors
    ///
    /// Unreadable or malformed files, malformed variables or incomplete
    /// options.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_layered(path.map(Path::to_path_buf).or_else(find_config_file), |name| {
            std::env::var(name).ok()
        })
    }

    fn load_layered<F>(path: Option<PathBuf>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let builder = match path {
            Some(path) => load_from_file(&path, Self::builder())?,
            None => Self::builder(),
        };
        load_from_lookup(builder, lookup)?.build()
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(|s| s.0.as_str())
    }

    /// Connect/busy timeout handed to the native driver.
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub const fn max_nesting_depth(&self) -> usize {
        self.max_nesting_depth
    }

    pub const fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The URL with `user` and `password` merged in as URL credentials.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if credentials are set and the URL cannot
    /// carry them.
    pub fn url_with_credentials(&self) -> Result<String> {
        if self.user.is_none() && self.password.is_none() {
            return Ok(self.url.clone());
        }
        let mut url = Url::parse(&self.url)
            .map_err(|e| Error::config(format!("Invalid connection URL: {e}")))?;
        if let Some(user) = &self.user {
            url.set_username(user)
                .map_err(|()| Error::config("Failed to set username in URL"))?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(&password.0))
                .map_err(|()| Error::config("Failed to set password in URL"))?;
        }
        Ok(url.to_string())
    }
}

/// Builder for [`ConnectOptions`].
#[derive(Debug, Clone, Default)]
pub struct ConnectOptionsBuilder {
    driver: Option<String>,
    url: Option<String>,
    user: Option<String>,
    password: Option<Secret>,
    timeout: Option<Duration>,
    max_nesting_depth: Option<usize>,
    properties: BTreeMap<String, String>,
}

impl ConnectOptionsBuilder {
    #[must_use]
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Secret(password.into()));
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = Some(depth);
        self
    }

    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Apply one loosely-typed option by name.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for unparseable numeric values.
    pub fn option(self, key: &str, value: String) -> Result<Self> {
        let key = key.trim().trim_start_matches(':').to_lowercase();
        Ok(match key.as_str() {
            "driver" => self.driver(value),
            "url" => self.url(value),
            "user" | "username" => self.user(value),
            "password" => self.password(value),
            "timeout" | "timeout_secs" => self.timeout(parse_secs(&key, &value)?),
            "max_nesting_depth" => self.max_nesting_depth(parse_number(&key, &value)?),
            _ => self.property(key, value),
        })
    }

    /// # Errors
    ///
    /// Returns `Error::Config` if `driver` or `url` is missing, or the
    /// nesting depth is zero.
    pub fn build(self) -> Result<ConnectOptions> {
        let driver = self
            .driver
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| Error::config("driver is required"))?;
        let url = self
            .url
            .ok_or_else(|| Error::config("url is required"))?;
        let max_nesting_depth = self.max_nesting_depth.unwrap_or(MAX_STATEMENT_NESTING_LEVEL);
        if max_nesting_depth == 0 {
            return Err(Error::config("max_nesting_depth must be at least 1"));
        }

        Ok(ConnectOptions {
            driver,
            url,
            user: self.user,
            password: self.password,
            timeout: self.timeout,
            max_nesting_depth,
            properties: self.properties,
        })
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::config(format!("Invalid {key} '{value}': {e}")))
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| Error::config(format!("Invalid {key} '{value}': expected seconds")))
}
