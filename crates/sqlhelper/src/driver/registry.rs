//! Name → driver resolution.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::Driver;
use crate::error::{Error, Result};

/// Registered drivers, keyed by lowercase identifier and alias.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every driver compiled into this build.
    #[must_use]
    #[allow(unused_mut)]
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "sqlite")]
        registry.register_with_aliases(
            Arc::new(super::sqlite::SqliteDriver),
            &["sqlite3", "rusqlite"],
        );
        #[cfg(feature = "hana")]
        registry.register_with_aliases(Arc::new(super::hana::HanaDriver), &["hdbconnect", "hdb"]);
        registry
    }

    /// Register a driver under its own name. Replaces an earlier driver of the same name.
    pub fn register(&mut self, driver: Arc<dyn Driver>) -> &mut Self {
        self.drivers.insert(driver.name().to_lowercase(), driver);
        self
    }

    /// Register a driver under its own name and every alias.
    pub fn register_with_aliases(&mut self, driver: Arc<dyn Driver>, aliases: &[&str]) -> &mut Self {
        for alias in aliases {
            self.drivers
                .insert(alias.to_lowercase(), Arc::clone(&driver));
        }
        self.register(driver)
    }

    /// Look up a driver by identifier, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns `Error::DriverNotFound` for an unknown identifier.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Driver>> {
        self.drivers
            .get(&name.trim().to_lowercase())
            .cloned()
            .ok_or_else(|| Error::DriverNotFound(name.to_string()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(&name.trim().to_lowercase())
    }

    /// Registered identifiers, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}
