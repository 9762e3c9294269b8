//! Small helpers over [`http::HeaderMap`].
//!
//! `HeaderMap` already gives us the multimap we need: case-insensitive names,
//! ordered values per name. These helpers add the list-header handling that
//! HTTP layers on top (`Accept-Encoding: gzip, br` is two elements, not one).

use http::header::{HeaderMap, HeaderName, HeaderValue, VARY};

/// First value of `name` as a string, if present and valid UTF-8.
pub fn get_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Every comma-separated element of every `name` field line, trimmed.
///
/// Empty elements (`gzip,,br`) are dropped. Values that are not visible ASCII
/// are skipped.
pub fn list_values(headers: &HeaderMap, name: &HeaderName) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|element| !element.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Appends `token` to `Vary` unless it is already covered.
///
/// A `Vary: *` response already varies on everything, so nothing is added.
pub fn append_vary(headers: &mut HeaderMap, token: &'static str) {
    let covered = list_values(headers, &VARY)
        .iter()
        .any(|v| v == "*" || v.eq_ignore_ascii_case(token));

    if !covered {
        headers.append(VARY, HeaderValue::from_static(token));
    }
}
