//! Read-only queries that find what the scheduled jobs should act on.

mod scanner;

pub use scanner::{GraceWarning, RetentionScanner, days_remaining};
