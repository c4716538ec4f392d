//! Search query parser.
//!
//! Parses user-typed query strings into a structured [`LexicalQuery`].
//!
//! # Supported syntax
//!
//! **Simple search**: `budget` searches subject, body, attachment text and sender.
//!
//! **Field-specific**:
//! - `subject:invoice`
//! - `body:important`
//! - `attachment:spreadsheet`
//! - `from:user@example.com` / `sender:user@example.com`
//!
//! **Operators**:
//! - `term1 term2`: implicit AND
//! - `term1 OR term2`: explicit OR
//! - `-term`: NOT (exclude)
//! - `"exact phrase"`: every word of the phrase required
//!
//! An unknown `prefix:value` is searched as plain text.

use std::collections::HashSet;

use crate::embedding::tokenize;
use crate::index::lexical::LexicalField;
use crate::model::message::Message;

/// A single search term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTerm {
    /// Field restriction; `None` searches the default fields.
    pub field: Option<LexicalField>,
    /// Raw term text, quotes removed. Tokenized by the index.
    pub text: String,
    /// Exclude documents matching this term.
    pub negated: bool,
}

/// A fully parsed query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LexicalQuery {
    /// Terms, AND-ed unless `is_or`.
    pub terms: Vec<QueryTerm>,
    /// Whether this is an OR query (any term matches) vs AND (all must match).
    pub is_or: bool,
}

impl QueryTerm {
    /// Whether every token of the term occurs in the searched fields of `msg`.
    ///
    /// Same rule as the lexical index: tokens may be spread over several
    /// fields, and a term without tokens matches nothing.
    pub fn matches(&self, msg: &Message, default_fields: &[LexicalField]) -> bool {
        let fields: &[LexicalField] = match &self.field {
            Some(f) => std::slice::from_ref(f),
            None => default_fields,
        };
        let present: HashSet<String> = fields.iter().flat_map(|f| tokenize(f.text(msg))).collect();
        let mut tokens = tokenize(&self.text).peekable();
        tokens.peek().is_some() && tokens.all(|t| present.contains(&t))
    }
}

impl LexicalQuery {
    /// Whether at least one term can select documents.
    pub fn has_positive_term(&self) -> bool {
        self.terms.iter().any(|t| !t.negated)
    }

    /// Text to embed for the semantic branch: the positive terms only,
    /// without field prefixes, quotes or `OR`.
    pub fn semantic_text(&self) -> String {
        self.terms
            .iter()
            .filter(|t| !t.negated)
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Whether any negated term matches `msg`.
    pub fn excludes(&self, msg: &Message, default_fields: &[LexicalField]) -> bool {
        self.terms
            .iter()
            .any(|t| t.negated && t.matches(msg, default_fields))
    }
}

/// Parse a query string into a structured [`LexicalQuery`].
///
/// Never fails: unrecognized syntax is treated as plain text.
pub fn parse_query(input: &str) -> LexicalQuery {
    let tokens = split_tokens(input.trim());
    let is_or = tokens.iter().any(|t| t == "OR");

    let mut terms = Vec::new();
    for token in &tokens {
        if token == "OR" {
            continue;
        }

        let (negated, token) = match token.strip_prefix('-') {
            Some(stripped) if !stripped.is_empty() => (true, stripped),
            _ => (false, token.as_str()),
        };

        let (field, value) = match token.split_once(':') {
            Some((prefix, value)) if !value.is_empty() => {
                match LexicalField::from_prefix(&prefix.to_lowercase()) {
                    Some(field) => (Some(field), value),
                    None => (None, token),
                }
            }
            _ => (None, token),
        };

        let text = unquote(value);
        if text.trim().is_empty() {
            continue;
        }
        terms.push(QueryTerm {
            field,
            text: text.to_string(),
            negated,
        });
    }

    LexicalQuery { terms, is_or }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or_else(|| value.trim_matches('"'))
}

/// Split input on whitespace, respecting quoted strings.
fn split_tokens(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in input.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
            current.push(ch);
        } else if ch.is_whitespace() && !in_quotes {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
