#[cfg(feature = "logger")]
/// This module provides a logger item writer, useful for debugging.
pub mod logger;

#[cfg(feature = "csv")]
/// This module provides a CSV item reader.
pub mod csv;

#[cfg(feature = "rdbc-sqlite")]
/// This module provides RDBC (SQLite) item writers.
pub mod rdbc;
