//! `chart.spec`: turns a row set and a placeholder description into a chart
//! type and series/category assignment for the document assembler.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolContext, ToolInput, ToolObservation};

/// Chart kinds the document assembler knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartType {
    Pie,
    Bar,
    Line,
}

impl ChartType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChartType::Pie => "pie",
            ChartType::Bar => "bar",
            ChartType::Line => "line",
        }
    }
}

fn classify(description: &str, row_count: usize) -> ChartType {
    let lowered = description.to_ascii_lowercase();
    if lowered.contains("trend") || lowered.contains("over time") || lowered.contains("daily")
        || lowered.contains("weekly") || lowered.contains("monthly")
    {
        ChartType::Line
    } else if lowered.contains("share") || lowered.contains("占比") || lowered.contains("proportion")
        || (lowered.contains("ranking") && row_count <= 6)
    {
        ChartType::Pie
    } else {
        ChartType::Bar
    }
}

/// Build a chart spec from row data shaped as either positional tuples or
/// keyed records. The first column is treated as the category axis, the
/// second as the series value.
#[must_use]
pub fn build_spec(rows: &Value, description: &str) -> Value {
    let rows_arr = rows.as_array().cloned().unwrap_or_default();
    let mut categories = Vec::new();
    let mut series = Vec::new();
    for row in &rows_arr {
        match row {
            Value::Array(cells) => {
                categories.push(cells.first().cloned().unwrap_or(Value::Null));
                series.push(cells.get(1).cloned().unwrap_or(Value::Null));
            }
            Value::Object(map) => {
                let mut values = map.values();
                categories.push(values.next().cloned().unwrap_or(Value::Null));
                series.push(values.next().cloned().unwrap_or(Value::Null));
            }
            other => {
                categories.push(other.clone());
                series.push(Value::Null);
            }
        }
    }

    let chart_type = classify(description, rows_arr.len());
    json!({
        "chart_type": chart_type.as_str(),
        "series": series,
        "categories": categories,
        "title": description,
    })
}

/// `chart.spec` tool.
#[derive(Debug)]
pub struct ChartSpecTool;

#[async_trait]
impl Tool for ChartSpecTool {
    fn name(&self) -> &'static str {
        "chart.spec"
    }

    fn description(&self) -> &'static str {
        "Derive a chart type, series and categories from query rows and a placeholder description."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"rows": {"type": "array"}, "placeholder_description": {"type": "string"}},
            "required": ["rows", "placeholder_description"],
        })
    }

    async fn execute(&self, input: ToolInput, _ctx: &ToolContext) -> ToolObservation {
        let ToolInput::ChartSpec { rows, placeholder_description } = input else {
            return ToolObservation::failed("unexpected input for chart.spec");
        };
        ToolObservation::ok(build_spec(&rows, &placeholder_description))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_description_yields_line_chart() {
        let spec = build_spec(&json!([["2026-01", 10], ["2026-02", 20]]), "monthly sales trend");
        assert_eq!(spec["chart_type"], "line");
    }

    #[test]
    fn share_description_yields_pie_chart() {
        let spec = build_spec(&json!([["A", 1], ["B", 2]]), "revenue share by region");
        assert_eq!(spec["chart_type"], "pie");
    }

    #[test]
    fn default_description_yields_bar_chart() {
        let spec = build_spec(&json!([["A", 1], ["B", 2]]), "top products by units sold");
        assert_eq!(spec["chart_type"], "bar");
    }

    #[test]
    fn keyed_rows_split_into_category_and_series() {
        let spec = build_spec(&json!([{"region": "east", "total": 100}]), "sales by region");
        assert_eq!(spec["categories"], json!(["east"]));
        assert_eq!(spec["series"], json!([100]));
    }
}
