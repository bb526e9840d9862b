//! TOML configuration file loading

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::ConnectOptionsBuilder;
use crate::Result;
use crate::constants::CONFIG_PATHS;

/// First existing file among the standard locations.
///
/// A leading `~/` resolves against `$HOME`; the candidate is skipped when
/// `HOME` is unset.
pub fn find_config_file() -> Option<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    first_existing(CONFIG_PATHS, home.as_deref())
}

pub(crate) fn first_existing(candidates: &[&str], home: Option<&Path>) -> Option<PathBuf> {
    candidates
        .iter()
        .filter_map(|candidate| match candidate.strip_prefix("~/") {
            Some(rest) => home.map(|home| home.join(rest)),
            None => Some(PathBuf::from(candidate)),
        })
        .find(|path| path.is_file())
}

/// Load connection options from a TOML file
pub fn load_from_file(path: &Path, builder: ConnectOptionsBuilder) -> Result<ConnectOptionsBuilder> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    from_toml_str(&content, builder).map_err(|e| match e {
        crate::Error::Config(msg) => {
            crate::Error::Config(format!("{msg} (in {})", path.display()))
        }
        other => other,
    })
}

/// Apply a TOML document onto `builder`
pub fn from_toml_str(content: &str, builder: ConnectOptionsBuilder) -> Result<ConnectOptionsBuilder> {
    let file_config: FileConfig = toml::from_str(content)
        .map_err(|e| crate::Error::Config(format!("Failed to parse config file: {e}")))?;
    Ok(apply_file_config(builder, file_config))
}

fn apply_file_config(mut builder: ConnectOptionsBuilder, config: FileConfig) -> ConnectOptionsBuilder {
    let Some(conn) = config.connection else {
        return builder;
    };

    if let Some(driver) = conn.driver {
        builder = builder.driver(driver);
    }
    if let Some(url) = conn.url {
        builder = builder.url(url);
    }
    if let Some(user) = conn.user {
        builder = builder.user(user);
    }
    if let Some(password) = conn.password {
        builder = builder.password(password);
    }
    if let Some(secs) = conn.timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    if let Some(depth) = conn.max_nesting_depth {
        builder = builder.max_nesting_depth(depth);
    }
    for (key, value) in conn.properties {
        builder = builder.property(key, value);
    }
    builder
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    connection: Option<ConnectionSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConnectionSection {
    driver: Option<String>,
    url: Option<String>,
    user: Option<String>,
    password: Option<String>,
    timeout_secs: Option<u64>,
    max_nesting_depth: Option<usize>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}
