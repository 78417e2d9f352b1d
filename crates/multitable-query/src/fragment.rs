//! Quote-aware scanning of SQL fragments.
//!
//! A fragment is split into quoted runs (`'...'`, `"..."`, with doubled
//! quotes as escapes) and unquoted runs. Only a `?` inside an unquoted run
//! is a parameter marker.

use multitable_core::Dialect;
use regex::Regex;
use std::sync::OnceLock;

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"'(?:[^']|'')*'|"(?:[^"]|"")*"|[^'"]+|['"]"#)
            .unwrap_or_else(|e| unreachable!("static fragment regex: {e}"))
    })
}

/// One run of a scanned fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentRun<'a> {
    Quoted(&'a str),
    Unquoted(&'a str),
}

impl<'a> FragmentRun<'a> {
    pub fn text(self) -> &'a str {
        match self {
            FragmentRun::Quoted(s) | FragmentRun::Unquoted(s) => s,
        }
    }
}

/// Split a fragment into quoted and unquoted runs.
///
/// An unterminated quote is treated as unquoted text.
pub fn split_fragment(fragment: &str) -> Vec<FragmentRun<'_>> {
    token_regex()
        .find_iter(fragment)
        .map(|m| {
            let text = m.as_str();
            let quoted = text.len() >= 2
                && ((text.starts_with('\'') && text.ends_with('\''))
                    || (text.starts_with('"') && text.ends_with('"')));
            if quoted {
                FragmentRun::Quoted(text)
            } else {
                FragmentRun::Unquoted(text)
            }
        })
        .collect()
}

/// Number of `?` markers outside quoted literals.
pub fn count_parameter_markers(fragment: &str) -> usize {
    split_fragment(fragment)
        .into_iter()
        .filter_map(|run| match run {
            FragmentRun::Unquoted(s) => Some(s.matches('?').count()),
            FragmentRun::Quoted(_) => None,
        })
        .sum()
}

/// Replace each unquoted `?` with the dialect placeholder, numbering from
/// `offset + 1`.
pub fn render_placeholders(sql: &str, dialect: &dyn Dialect, offset: usize) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut index = offset;
    for run in split_fragment(sql) {
        match run {
            FragmentRun::Quoted(s) => out.push_str(s),
            FragmentRun::Unquoted(s) => {
                for ch in s.chars() {
                    if ch == '?' {
                        index += 1;
                        out.push_str(&dialect.placeholder(index));
                    } else {
                        out.push(ch);
                    }
                }
            }
        }
    }
    out
}
