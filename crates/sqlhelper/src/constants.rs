//! Shared constants.

/// Default cap on nested row-producing executions per connection.
pub const MAX_STATEMENT_NESTING_LEVEL: usize = 20;

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration file locations checked by [`crate::config::find_config_file`], in order.
pub const CONFIG_PATHS: &[&str] = &[
    "./sqlhelper.toml",
    "~/.config/sqlhelper/config.toml",
    "/etc/sqlhelper/config.toml",
];
