//! Environment variable loading for connection options

use std::time::Duration;

use super::ConnectOptionsBuilder;
use crate::Result;

/// Environment variable names
mod vars {
    pub const DRIVER: &str = "SQLHELPER_DRIVER";
    pub const URL: &str = "SQLHELPER_URL";
    pub const USER: &str = "SQLHELPER_USER";
    pub const PASSWORD: &str = "SQLHELPER_PASSWORD";
    pub const TIMEOUT_SECS: &str = "SQLHELPER_TIMEOUT_SECS";
    pub const MAX_NESTING: &str = "SQLHELPER_MAX_NESTING";
}

/// Load connection options from the process environment
pub fn load_from_env(builder: ConnectOptionsBuilder) -> Result<ConnectOptionsBuilder> {
    load_from_lookup(builder, |name| std::env::var(name).ok())
}

/// Load connection options through an arbitrary variable lookup
pub fn load_from_lookup<F>(mut builder: ConnectOptionsBuilder, lookup: F) -> Result<ConnectOptionsBuilder>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(driver) = lookup(vars::DRIVER) {
        builder = builder.driver(driver);
    }
    if let Some(url) = lookup(vars::URL) {
        builder = builder.url(url);
    }
    if let Some(user) = lookup(vars::USER) {
        builder = builder.user(user);
    }
    if let Some(password) = lookup(vars::PASSWORD) {
        builder = builder.password(password);
    }

    if let Some(secs) = lookup(vars::TIMEOUT_SECS) {
        let secs = secs.trim().parse::<u64>().map_err(|e| {
            crate::Error::Config(format!("Invalid {}: {}", vars::TIMEOUT_SECS, e))
        })?;
        builder = builder.timeout(Duration::from_secs(secs));
    }

    if let Some(depth) = lookup(vars::MAX_NESTING) {
        let depth = depth.trim().parse::<usize>().map_err(|e| {
            crate::Error::Config(format!("Invalid {}: {}", vars::MAX_NESTING, e))
        })?;
        builder = builder.max_nesting_depth(depth);
    }

    Ok(builder)
}
