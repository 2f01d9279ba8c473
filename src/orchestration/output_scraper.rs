//! # Output Scraper
//!
//! Narrow decoder for values embedded in free-text runner output. Playbooks
//! print JSON-ish fragments such as
//!
//! ```text
//! ok: [localhost] => { "token": "eyJhbGciOi..." }
//! ok: [localhost] => { "route": "https://app.apps.cluster" }
//! ```
//!
//! The expected shape is `"<field>"`, optional whitespace, `:`, optional
//! whitespace, then a double-quoted non-empty value without embedded quotes.
//! The first well-formed fragment for a field wins within one output.

/// Values recognized in one step's output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapedValues {
    pub token: Option<String>,
    pub route: Option<String>,
}

pub const TOKEN_FIELD: &str = "token";
pub const ROUTE_FIELD: &str = "route";

/// Scan a complete step output for the token and route fragments
pub fn scrape(output: &str) -> ScrapedValues {
    ScrapedValues {
        token: find_field(output, TOKEN_FIELD),
        route: find_field(output, ROUTE_FIELD),
    }
}

/// First `"field": "value"` fragment in `output`
pub fn find_field(output: &str, field: &str) -> Option<String> {
    let needle = format!("\"{field}\"");
    let mut search_from = 0;

    while let Some(offset) = output[search_from..].find(&needle) {
        let after_key = search_from + offset + needle.len();
        if let Some(value) = value_after_key(&output[after_key..]) {
            return Some(value.to_string());
        }
        search_from = after_key;
    }
    None
}

fn value_after_key(rest: &str) -> Option<&str> {
    let rest = rest.trim_start().strip_prefix(':')?;
    let rest = rest.trim_start().strip_prefix('"')?;
    let end = rest.find('"')?;
    (end > 0).then(|| &rest[..end])
}
