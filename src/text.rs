//! Output clean-up for values read back from external tools
//!
//! `kubectl --template '{{.status.podIP}}'` and friends frequently hand the
//! value back wrapped in the quotes that were part of the template. These
//! helpers peel that wrapping off without otherwise touching the value.

/// Strip one layer of matching outer quotes
///
/// Only applies to strings of at least two bytes whose first and last
/// characters are the same quote character (`"` or `'`). Everything else,
/// including surrounding whitespace and embedded newlines, is returned as-is.
///
/// # Example
///
/// ```
/// use aksprobe::text::trim_quotes;
///
/// assert_eq!(trim_quotes("\"10.0.0.4\""), "10.0.0.4");
/// assert_eq!(trim_quotes("'10.0.0.4'"), "10.0.0.4");
/// assert_eq!(trim_quotes("10.0.0.4"), "10.0.0.4");
/// ```
#[must_use]
pub fn trim_quotes(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() < 2 {
        return s;
    }

    let first = bytes[0];
    let last = bytes[bytes.len() - 1];
    if first == last && (first == b'"' || first == b'\'') {
        // Both ends are single-byte ASCII, so these are char boundaries
        return &s[1..s.len() - 1];
    }

    s
}

/// Drop the single line terminator a CLI appends to its output
///
/// Only one `\n` (or `\r\n`) is removed; any further whitespace is content.
#[must_use]
pub fn strip_line_terminator(s: &str) -> &str {
    s.strip_suffix("\r\n")
        .or_else(|| s.strip_suffix('\n'))
        .unwrap_or(s)
}
