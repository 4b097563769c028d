//! `sql.validate`: tokenization, identifier resolution, forbidden-verb check.
//!
//! The tokenizer and comment/string stripper are adapted from the teacher's
//! SQL-database tools crate, which needs the same building blocks to extract
//! referenced table names for its own guardrails.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;

use super::{Tool, ToolContext, ToolInput, ToolObservation};

const FORBIDDEN_VERBS: &[&str] = &["drop", "delete", "update", "truncate", "alter", "insert"];

/// Strip string/comment contents so identifier scanning never matches inside
/// a literal or a comment. Mirrors the teacher's `strip_sql_comments_and_strings`.
fn strip_comments_and_strings(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                out.push(' ');
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        out.push(' ');
                        i += 1;
                        break;
                    }
                    out.push(' ');
                    i += 1;
                }
            }
            b'-' if i + 1 < bytes.len() && bytes[i + 1] == b'-' => {
                out.push_str("  ");
                i += 2;
                while i < bytes.len() && bytes[i] != b'\n' {
                    out.push(' ');
                    i += 1;
                }
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                out.push_str("  ");
                i += 2;
                while i + 1 < bytes.len() {
                    if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                        out.push_str("  ");
                        i += 2;
                        break;
                    }
                    out.push(' ');
                    i += 1;
                }
            }
            _ => {
                let ch = sql[i..].chars().next().unwrap_or('\0');
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }
    out
}

fn tokenize_words(sql: &str) -> Vec<String> {
    let cleaned = strip_comments_and_strings(sql);
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in cleaned.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            current.push(ch);
        } else if !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn forbidden_verb_used(words: &[String]) -> Option<String> {
    words
        .iter()
        .find(|w| FORBIDDEN_VERBS.contains(&w.to_ascii_lowercase().as_str()))
        .cloned()
}

fn known_identifiers(schema_snapshot: &Value) -> BTreeSet<String> {
    let mut known = BTreeSet::new();
    match schema_snapshot {
        Value::Object(tables) => {
            for (table, columns) in tables {
                known.insert(table.to_ascii_lowercase());
                if let Value::Array(cols) = columns {
                    for col in cols {
                        if let Some(name) = col.get("column").and_then(Value::as_str) {
                            known.insert(name.to_ascii_lowercase());
                        }
                    }
                }
            }
        }
        Value::Array(tables) => {
            for table in tables {
                if let Some(name) = table.as_str() {
                    known.insert(name.to_ascii_lowercase());
                }
            }
        }
        _ => {}
    }
    known
}

/// Run validation checks used by both the `sql.validate` tool and the
/// validate-only repair mode; returns the list of issues (empty = valid).
#[must_use]
pub fn validate(sql: &str, schema_snapshot: &Value) -> Vec<String> {
    let mut issues = Vec::new();
    if sql.trim().is_empty() {
        issues.push("SQL is empty".to_string());
        return issues;
    }

    let words = tokenize_words(sql);
    if let Some(verb) = forbidden_verb_used(&words) {
        issues.push(format!("forbidden statement type: {verb}"));
    }

    if !words.iter().any(|w| w.eq_ignore_ascii_case("select")) {
        issues.push("statement does not contain a SELECT".to_string());
    }

    let open = sql.matches('(').count();
    let close = sql.matches(')').count();
    if open != close {
        issues.push(format!("unbalanced parentheses: {open} open, {close} close"));
    }

    let known = known_identifiers(schema_snapshot);
    if !known.is_empty() {
        // Only check bare words that look like table/column references directly
        // after FROM/JOIN; a full identifier resolver is out of scope, but this
        // catches the common case of a hallucinated table name.
        let lowered: Vec<String> = words.iter().map(|w| w.to_ascii_lowercase()).collect();
        for (idx, word) in lowered.iter().enumerate() {
            if (word == "from" || word == "join") && idx + 1 < lowered.len() {
                let candidate = &lowered[idx + 1];
                if !known.contains(candidate) && !is_reserved_word(candidate) {
                    issues.push(format!("unknown identifier referenced: {candidate}"));
                }
            }
        }
    }

    issues
}

fn is_reserved_word(word: &str) -> bool {
    matches!(
        word,
        "select" | "where" | "as" | "on" | "and" | "or" | "group" | "order" | "by" | "limit"
    )
}

/// `sql.validate` tool wrapper around [`validate`].
#[derive(Debug)]
pub struct SqlValidateTool;

#[async_trait]
impl Tool for SqlValidateTool {
    fn name(&self) -> &'static str {
        "sql.validate"
    }

    fn description(&self) -> &'static str {
        "Validate a SQL statement against the known schema and forbidden-verb rules."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"sql": {"type": "string"}, "schema_snapshot": {"type": "object"}},
            "required": ["sql"],
        })
    }

    async fn execute(&self, input: ToolInput, _ctx: &ToolContext) -> ToolObservation {
        let ToolInput::SqlValidate { sql, schema_snapshot } = input else {
            return ToolObservation::failed("unexpected input for sql.validate");
        };
        let issues = validate(&sql, &schema_snapshot);
        ToolObservation::ok(json!({"valid": issues.is_empty(), "issues": issues}))
    }
}
