/// Get environment variable with TAXFLOW_ prefix, falling back to unprefixed version
///
/// Checks `TAXFLOW_{key}` first, then `{key}`, so deployments can use either
/// the namespaced form or the plain names (`GRACE_PERIOD_DAYS`, ...).
///
/// # Examples
///
/// ```rust
/// use taxflow::utils::get_env_with_prefix;
///
/// // Checks TAXFLOW_GRACE_PERIOD_DAYS first, then GRACE_PERIOD_DAYS
/// let grace = get_env_with_prefix("GRACE_PERIOD_DAYS");
/// ```
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("TAXFLOW_{}", key))
        .or_else(|_| std::env::var(key))
        .ok()
}

/// Parse an environment value, logging and ignoring values that don't parse.
pub(crate) fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = get_env_with_prefix(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(
                target: "taxflow::config",
                key,
                value = %raw,
                "Ignoring unparseable configuration value"
            );
            None
        }
    }
}
