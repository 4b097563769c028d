//! Calls the LLM for the next PTAV step, with one JSON parse-repair attempt.

use std::sync::Arc;

use crate::collaborators::{ChatMessage, CompletionOptions, LLMClient};
use crate::error::{Error, Result};
use crate::model::{Observation, Plan, PlanStep};
use crate::resource_pool::ResourcePool;
use crate::tools::registry::ToolRegistry;

use super::prompt::PromptBuilder;

/// Bound on how many prior observations are folded into the prompt, to keep
/// it from growing unbounded across iterations.
const MAX_RECENT_OBSERVATIONS: usize = 5;

/// Produces the next [`Plan`] by calling the configured [`LLMClient`].
pub struct Planner {
    llm: Arc<dyn LLMClient>,
    tools: Arc<ToolRegistry>,
}

impl Planner {
    #[must_use]
    pub fn new(llm: Arc<dyn LLMClient>, tools: Arc<ToolRegistry>) -> Self {
        Self { llm, tools }
    }

    /// Build the prompt for the current state and ask the model for a plan.
    pub async fn plan(
        &self,
        goal: &str,
        pool: &ResourcePool,
        history: &[Observation],
    ) -> Result<Plan> {
        let mut builder = PromptBuilder::new().goal(goal);
        for key in pool.keys() {
            if let Some(value) = pool.get(&key) {
                builder = builder.known_fact(format!("{key}: {value:?}"));
            }
        }
        for (name, description) in self.tools.descriptors() {
            builder = builder.tool(name, description);
        }
        builder = builder.with_default_constraints();
        for obs in history.iter().rev().take(MAX_RECENT_OBSERVATIONS).rev() {
            let status = if obs.success { "ok" } else { "failed" };
            builder = builder.known_fact(format!(
                "previous call to {} {status}: {}",
                obs.tool_name,
                obs.error.clone().unwrap_or_else(|| obs.result.to_string())
            ));
        }
        let prompt = builder.build();

        let messages = [ChatMessage {
            role: "user".to_string(),
            content: prompt,
        }];
        let completion = self
            .llm
            .complete(&messages, &CompletionOptions::default())
            .await
            .map_err(|e| Error::ToolExecution {
                tool: "planner".to_string(),
                message: e.to_string(),
            })?;

        parse_plan(&completion.content)
    }
}

/// Parse the model's response into a [`Plan`], retrying once with a
/// code-fence-stripping, balanced-brace extraction pass.
pub fn parse_plan(raw: &str) -> Result<Plan> {
    if let Ok(plan) = parse_plan_strict(raw) {
        return Ok(plan);
    }
    let repaired = repair_json_text(raw);
    parse_plan_strict(&repaired).map_err(|_| Error::PlanParse(raw.to_string()))
}

fn parse_plan_strict(raw: &str) -> std::result::Result<Plan, serde_json::Error> {
    #[derive(serde::Deserialize)]
    struct RawPlan {
        reasoning: String,
        steps: Vec<RawStep>,
    }
    #[derive(serde::Deserialize)]
    struct RawStep {
        tool: String,
        #[serde(default)]
        input: serde_json::Map<String, serde_json::Value>,
    }

    let parsed: RawPlan = serde_json::from_str(raw.trim())?;
    Ok(Plan {
        reasoning: parsed.reasoning,
        steps: parsed
            .steps
            .into_iter()
            .map(|s| PlanStep {
                tool: s.tool,
                input: s.input,
            })
            .collect(),
    })
}

/// Strip common Markdown code fences and extract the first balanced `{...}`
/// block, for the second, best-effort parse attempt.
fn repair_json_text(raw: &str) -> String {
    let stripped = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let Some(start) = stripped.find('{') else {
        return stripped.to_string();
    };

    let mut depth = 0i32;
    for (idx, ch) in stripped[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return stripped[start..start + idx + 1].to_string();
                }
            }
            _ => {}
        }
    }
    stripped.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_plan_directly() {
        let raw = r#"{"reasoning": "need schema", "steps": [{"tool": "schema.list_tables", "input": {}}]}"#;
        let plan = parse_plan(raw).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].tool, "schema.list_tables");
    }

    #[test]
    fn repairs_plan_wrapped_in_code_fence() {
        let raw = "```json\n{\"reasoning\": \"x\", \"steps\": []}\n```";
        let plan = parse_plan(raw).unwrap();
        assert_eq!(plan.reasoning, "x");
    }

    #[test]
    fn repairs_plan_with_leading_prose() {
        let raw = "Sure, here is the plan:\n{\"reasoning\": \"x\", \"steps\": []}\nLet me know if you need more.";
        let plan = parse_plan(raw).unwrap();
        assert_eq!(plan.reasoning, "x");
    }

    #[test]
    fn unparseable_response_is_plan_parse_error() {
        let err = parse_plan("not json at all").unwrap_err();
        assert!(matches!(err, Error::PlanParse(_)));
    }
}
