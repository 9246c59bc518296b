//! Shared constants for the graphforge CLI.

/// Configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".graphforge.toml";

/// Spinner tick interval in milliseconds.
///
/// How often the progress spinner updates.
pub const SPINNER_TICK_MS: u64 = 100;

/// Failures listed per partition in table output. JSON output lists all.
pub const MAX_LISTED_FAILURES: usize = 20;
