//! Identifier normalization.
//!
//! Table and column names are never bound as parameters, so every name that
//! reaches generated SQL goes through [`safe_key_string`] first.

/// Turn an arbitrary string into a safe SQL identifier.
///
/// Every character outside `[A-Za-z0-9]` becomes `_`, and a leading digit is
/// prefixed with `_`. Total and idempotent.
///
/// ```
/// use sqlite_tables::safe_key_string;
///
/// assert_eq!(safe_key_string("92M#Al-Function-Name"), "_92M_Al_Function_Name");
/// ```
pub fn safe_key_string(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 1);
    if key.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.push('_');
    }
    out.extend(
        key.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }),
    );
    out
}

/// Double-quote an already normalized identifier.
pub(crate) fn quoted(key: &str) -> String {
    format!("\"{}\"", safe_key_string(key))
}
