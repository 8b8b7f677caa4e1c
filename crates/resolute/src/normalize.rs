//! Text normalization used by every comparison in the engine.
//!
//! Grid cells and form labels render with inconsistent spacing and casing, so
//! nothing in the engine compares raw strings. Three levels are used:
//!
//! - [`collapse`]: trim and collapse internal whitespace runs to one space
//! - [`fold`]: collapse, then lower-case
//! - [`compact`]: drop all whitespace, then lower-case (enum-like free text,
//!   where "Prefer not to say" may render as "PreferNotToSay")

use std::cmp::Ordering;

/// Trim and collapse runs of whitespace to a single space
#[must_use]
pub fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse whitespace and lower-case
#[must_use]
pub fn fold(s: &str) -> String {
    collapse(s).to_lowercase()
}

/// Remove all whitespace and lower-case
#[must_use]
pub fn compact(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Case- and whitespace-insensitive equality
#[must_use]
pub fn text_eq(a: &str, b: &str) -> bool {
    fold(a) == fold(b)
}

/// Equality after stripping all whitespace and case
#[must_use]
pub fn compact_eq(a: &str, b: &str) -> bool {
    compact(a) == compact(b)
}

/// Case-insensitive ordinal comparison (upper-case folding, code point order)
#[must_use]
pub fn ordinal_ignore_case(a: &str, b: &str) -> Ordering {
    let left = a.chars().flat_map(char::to_uppercase);
    let right = b.chars().flat_map(char::to_uppercase);
    left.cmp(right)
}

/// Parse a cell as an integer; `None` for anything that is not one
#[must_use]
pub fn parse_int(s: &str) -> Option<i64> {
    s.trim().parse::<i64>().ok()
}

/// Split an identifier like `FamilyName` or `year_of_birth` into words
#[must_use]
pub fn humanize(identifier: &str) -> String {
    let mut out = String::with_capacity(identifier.len() + 4);
    let mut prev: Option<char> = None;
    for c in identifier.chars() {
        if c == '_' || c == '-' {
            if !out.ends_with(' ') && !out.is_empty() {
                out.push(' ');
            }
            prev = Some(' ');
            continue;
        }
        if let Some(p) = prev {
            let boundary = c.is_uppercase() && (p.is_lowercase() || p.is_ascii_digit());
            if boundary && !out.ends_with(' ') {
                out.push(' ');
            }
        }
        out.push(c);
        prev = Some(c);
    }
    out.trim().to_string()
}

/// Truncate text for diagnostics without splitting a character
#[must_use]
pub fn truncate(s: &str, max_chars: usize) -> String {
    let collapsed = collapse(s);
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut out: String = collapsed.chars().take(max_chars).collect();
    out.push('…');
    out
}
