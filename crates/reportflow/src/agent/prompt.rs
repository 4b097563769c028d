//! Centralized planner prompt assembly.
//!
//! Replaces ad hoc string concatenation with a builder that renders the five
//! required sections (goal, known facts, tools, constraints, JSON contract)
//! in a fixed order, appending a constant footer describing the output
//! contract (§4.3.1).

const JSON_CONTRACT_FOOTER: &str = r#"Respond with a single JSON object and nothing else, matching this shape:
{"reasoning": "<why you're taking these steps>", "steps": [{"tool": "<tool name>", "input": {}}]}
Do not wrap the JSON in a code fence. Do not include any text before or after it."#;

/// Builds the five-section PTAV planner prompt.
#[derive(Debug, Default)]
pub struct PromptBuilder {
    goal: String,
    known_facts: Vec<String>,
    tools: Vec<(String, String)>,
    constraints: Vec<String>,
}

impl PromptBuilder {
    /// Start a new, empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task goal sentence.
    #[must_use]
    pub fn goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    /// Append one already-known fact (schema tables, time window, current SQL).
    #[must_use]
    pub fn known_fact(mut self, fact: impl Into<String>) -> Self {
        self.known_facts.push(fact.into());
        self
    }

    /// Register a tool's one-line description.
    #[must_use]
    pub fn tool(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.tools.push((name.into(), description.into()));
        self
    }

    /// Append one constraint sentence (dialect, identifier exactness, etc).
    #[must_use]
    pub fn constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    /// Default constraints every PTAV prompt carries unless overridden.
    #[must_use]
    pub fn with_default_constraints(self) -> Self {
        self.constraint("Reference placeholders and identifiers unquoted, exact case as given.")
            .constraint("Match identifiers to the schema exactly; never invent table or column names.")
            .constraint("Target SQL dialect: PostgreSQL.")
    }

    /// Render the prompt: goal, known facts, tools, constraints, then the
    /// fixed JSON-contract footer.
    #[must_use]
    pub fn build(&self) -> String {
        let mut out = String::new();
        out.push_str("Goal:\n");
        out.push_str(&self.goal);
        out.push_str("\n\n");

        out.push_str("Known facts:\n");
        if self.known_facts.is_empty() {
            out.push_str("(none yet)\n");
        } else {
            for fact in &self.known_facts {
                out.push_str("- ");
                out.push_str(fact);
                out.push('\n');
            }
        }
        out.push('\n');

        out.push_str("Available tools:\n");
        for (name, description) in &self.tools {
            out.push_str("- ");
            out.push_str(name);
            out.push_str(": ");
            out.push_str(description);
            out.push('\n');
        }
        out.push('\n');

        out.push_str("Constraints:\n");
        for constraint in &self.constraints {
            out.push_str("- ");
            out.push_str(constraint);
            out.push('\n');
        }
        out.push('\n');

        out.push_str(JSON_CONTRACT_FOOTER);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_sections_in_fixed_order() {
        let prompt = PromptBuilder::new()
            .goal("Derive SQL for total_sales")
            .known_fact("schema:orders has columns [id, amount, created_at]")
            .tool("sql.execute", "Execute a SQL statement")
            .with_default_constraints()
            .build();

        let goal_idx = prompt.find("Goal:").unwrap();
        let facts_idx = prompt.find("Known facts:").unwrap();
        let tools_idx = prompt.find("Available tools:").unwrap();
        let constraints_idx = prompt.find("Constraints:").unwrap();
        let contract_idx = prompt.find("Respond with a single JSON object").unwrap();
        assert!(goal_idx < facts_idx);
        assert!(facts_idx < tools_idx);
        assert!(tools_idx < constraints_idx);
        assert!(constraints_idx < contract_idx);
    }

    #[test]
    fn empty_known_facts_renders_placeholder_line() {
        let prompt = PromptBuilder::new().goal("g").build();
        assert!(prompt.contains("(none yet)"));
    }
}
