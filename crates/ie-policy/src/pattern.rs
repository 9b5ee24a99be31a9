// pattern.rs — Pattern matching primitives for rule fields.
//
// Every string field of a request match rule is a pattern compared against
// one request attribute. Patterns are deliberately simple:
//
// - ""        matches anything (an unset field is a wildcard)
// - "*"       matches anything, including the empty string
// - "-"       matches only the empty string ("attribute must be absent")
// - "prefix*" matches values starting with "prefix"
// - "exact"   matches the identical value
// - "a, b, c" matches if any element matches on its own
//
// Precedence is top to bottom; the first applicable form decides.

/// Match a single pattern against a value.
pub fn match_pattern(pattern: &str, value: &str) -> bool {
    let pattern = pattern.trim();
    if match_single(pattern, value) {
        return true;
    }
    if is_single_form(pattern) {
        return false;
    }
    pattern.contains(',') && match_any_pattern(value, &split_rule(pattern))
}

/// True if `pattern` matches any of the candidate values.
///
/// Used when the request attribute is multi-valued, e.g. the caller's groups.
/// An empty candidate set matches nothing.
pub fn match_against_any<S: AsRef<str>>(pattern: &str, values: &[S]) -> bool {
    values.iter().any(|v| match_pattern(pattern, v.as_ref()))
}

/// True if `value` matches any of the patterns.
///
/// Each pattern goes through [`match_pattern`], so an element may itself be
/// a comma list.
pub fn match_any_pattern<S: AsRef<str>>(value: &str, patterns: &[S]) -> bool {
    patterns.iter().any(|p| match_pattern(p.as_ref(), value))
}

/// Split a comma-separated rule into trimmed elements, preserving order.
pub fn split_rule(rule: &str) -> Vec<String> {
    rule.split(',').map(|s| s.trim().to_string()).collect()
}

/// Rules 1–5: empty, `*`, `-`, trailing `*` prefix, exact.
fn match_single(pattern: &str, value: &str) -> bool {
    if pattern.is_empty() || pattern == "*" {
        return true;
    }
    if pattern == "-" {
        return value.is_empty();
    }
    if pattern.ends_with('*') {
        return value.starts_with(pattern.trim_end_matches('*'));
    }
    pattern == value
}

/// Whether rules 1–4 claim the pattern before the comma list is considered.
///
/// A pattern such as `"a,b*"` ends with `*` and is therefore a prefix match
/// on `"a,b"`, not a list.
fn is_single_form(pattern: &str) -> bool {
    pattern.is_empty() || pattern == "*" || pattern == "-" || pattern.ends_with('*')
}
