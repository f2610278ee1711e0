/// Basic email format validation.
///
/// Checks for exactly one `@`, a non-empty local part, and a dotted domain
/// with a non-empty TLD. Not RFC 5322 compliant.
pub(crate) fn is_valid_email(email: &str) -> bool {
    let email = email.trim();

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    if local.is_empty() || domain.contains('@') {
        return false;
    }

    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return false;
    }

    domain.rsplit('.').next().is_some_and(|tld| !tld.is_empty())
}
