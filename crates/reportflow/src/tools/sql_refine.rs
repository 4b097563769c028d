//! `sql.refine`: deterministic textual fixes, then an LLM semantic-repair hook.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::{Tool, ToolContext, ToolInput, ToolObservation};
use crate::collaborators::{ChatMessage, CompletionOptions, LLMClient};

/// Apply case-normalization of known identifiers, parenthesis balancing and
/// trailing-semicolon stripping, without touching the model. Returns the
/// fixed SQL and notes describing what changed.
#[must_use]
pub fn deterministic_fixes(sql: &str, schema: &Value) -> (String, Vec<String>) {
    let mut notes = Vec::new();
    let mut fixed = sql.trim().trim_end_matches(';').to_string();
    if fixed.len() != sql.trim().len() {
        notes.push("stripped trailing semicolon".to_string());
    }

    let known = known_identifier_casing(schema);
    if !known.is_empty() {
        let mut rewritten = String::with_capacity(fixed.len());
        let mut word = String::new();
        let mut changed = false;
        for ch in fixed.chars().chain(std::iter::once(' ')) {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                word.push(ch);
                continue;
            }
            if !word.is_empty() {
                if let Some(canonical) = known.get(&word.to_ascii_lowercase()) {
                    if canonical != &word {
                        changed = true;
                    }
                    rewritten.push_str(canonical);
                } else {
                    rewritten.push_str(&word);
                }
                word.clear();
            }
            rewritten.push(ch);
        }
        rewritten.pop(); // drop the sentinel space appended above
        if changed {
            notes.push("normalized identifier casing to match schema".to_string());
        }
        fixed = rewritten;
    }

    let open = fixed.matches('(').count();
    let close = fixed.matches(')').count();
    if open > close {
        fixed.push_str(&")".repeat(open - close));
        notes.push(format!("balanced {} missing closing parenthesis", open - close));
    }

    (fixed, notes)
}

fn known_identifier_casing(schema: &Value) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Value::Object(tables) = schema {
        for (table, columns) in tables {
            map.insert(table.to_ascii_lowercase(), table.clone());
            if let Value::Array(cols) = columns {
                for col in cols {
                    if let Some(name) = col.get("column").and_then(Value::as_str) {
                        map.insert(name.to_ascii_lowercase(), name.to_string());
                    }
                }
            }
        }
    }
    map
}

/// Ask the model to repair SQL given the issues `sql.validate` reported,
/// after deterministic fixes have already been tried.
pub async fn semantic_repair(
    llm: &dyn LLMClient,
    sql: &str,
    issues: &[String],
    schema: &Value,
) -> Result<String, crate::error::Error> {
    let prompt = format!(
        "The following SQL failed validation.\nSQL:\n{sql}\nIssues:\n{}\nKnown schema:\n{}\nReturn corrected SQL only, no prose, no code fences.",
        issues.join("\n"),
        schema,
    );
    let messages = [ChatMessage {
        role: "user".to_string(),
        content: prompt,
    }];
    let options = CompletionOptions {
        json_object: false,
        ..CompletionOptions::default()
    };
    let completion = llm
        .complete(&messages, &options)
        .await
        .map_err(|e| crate::error::Error::ToolExecution {
            tool: "sql.refine".to_string(),
            message: e.to_string(),
        })?;
    Ok(completion.content.trim().trim_end_matches(';').to_string())
}

/// `sql.refine` tool: deterministic fixes only. Semantic repair is invoked
/// separately by the validate-only repair path, which has direct access to
/// the `LLMClient`.
#[derive(Debug)]
pub struct SqlRefineTool;

#[async_trait]
impl Tool for SqlRefineTool {
    fn name(&self) -> &'static str {
        "sql.refine"
    }

    fn description(&self) -> &'static str {
        "Apply deterministic SQL fixes (identifier casing, parenthesis balance, trailing semicolons)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"sql": {"type": "string"}, "issues": {"type": "array"}, "schema": {"type": "object"}},
            "required": ["sql"],
        })
    }

    async fn execute(&self, input: ToolInput, _ctx: &ToolContext) -> ToolObservation {
        let ToolInput::SqlRefine { sql, schema, .. } = input else {
            return ToolObservation::failed("unexpected input for sql.refine");
        };
        let (fixed, notes) = deterministic_fixes(&sql, &schema);
        ToolObservation::ok(json!({"sql": fixed, "notes": notes}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_semicolon() {
        let (fixed, notes) = deterministic_fixes("SELECT 1;", &Value::Null);
        assert_eq!(fixed, "SELECT 1");
        assert!(notes.iter().any(|n| n.contains("semicolon")));
    }

    #[test]
    fn balances_missing_closing_paren() {
        let (fixed, notes) = deterministic_fixes("SELECT sum(amount FROM orders", &Value::Null);
        assert_eq!(fixed, "SELECT sum(amount FROM orders)");
        assert!(notes.iter().any(|n| n.contains("parenthesis")));
    }

    #[test]
    fn normalizes_identifier_casing_to_schema() {
        let schema = json!({"Orders": [{"column": "Amount"}]});
        let (fixed, notes) = deterministic_fixes("select amount from orders", &schema);
        assert_eq!(fixed, "select Amount from Orders");
        assert!(notes.iter().any(|n| n.contains("casing")));
    }
}
