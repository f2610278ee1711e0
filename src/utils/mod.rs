//! Utility functions and helpers.
//!
//! Environment variable handling, bounded waits on external calls, and
//! input validation.

pub mod env;
pub mod timeout;
pub(crate) mod validation;

pub use env::get_env_with_prefix;
pub use timeout::with_timeout;
