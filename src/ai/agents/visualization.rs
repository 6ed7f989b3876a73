use std::sync::Arc;

use serde::Deserialize;

use super::AgentError;
use crate::ai::llm_client::CompletionService;
use crate::ai::normalize::normalize_output;
use crate::ai::prompts;
use crate::ai::workflow::state::{ChartKind, ExecuteSqlResult};

/// Picks a chart for a result and renders it as HTML.
pub struct VisualizationAgent {
    llm: Arc<dyn CompletionService>,
}

#[derive(Debug, Deserialize)]
struct ChartChoice {
    #[serde(default)]
    chart_type: String,
}

impl VisualizationAgent {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    /// `None` means no chart should be drawn.
    pub async fn choose(&self, question: &str, sql: &str) -> Result<Option<ChartKind>, AgentError> {
        let (system, user) = prompts::choose_visualization(question, sql);
        let raw = self
            .llm
            .complete(&system, &user)
            .await
            .map_err(AgentError::completion)?;
        Ok(parse_chart_choice(&raw))
    }

    pub async fn generate(
        &self,
        question: &str,
        sql: &str,
        result: &ExecuteSqlResult,
        kind: ChartKind,
    ) -> Result<String, AgentError> {
        let (system, user) =
            prompts::generate_visualization(question, sql, &result.to_prompt_text(), kind);
        let raw = self
            .llm
            .complete(&system, &user)
            .await
            .map_err(AgentError::completion)?;
        Ok(normalize_output(&raw))
    }
}

/// Read `{"chart_type": "..."}`; unparseable output or an unknown kind means no chart.
pub fn parse_chart_choice(raw: &str) -> Option<ChartKind> {
    let normalized = normalize_output(raw);
    let normalized = normalized
        .strip_prefix("json")
        .map(str::trim_start)
        .unwrap_or(&normalized);

    let choice = match serde_json::from_str::<ChartChoice>(normalized) {
        Ok(choice) => choice.chart_type,
        Err(e) => {
            tracing::warn!("[turn] Unparseable chart choice {:?}: {}", normalized, e);
            return None;
        }
    };

    if choice.trim().is_empty() {
        return None;
    }

    match choice.parse::<ChartKind>() {
        Ok(kind) => Some(kind),
        Err(e) => {
            tracing::warn!("[turn] Ignoring chart choice: {}", e);
            None
        }
    }
}
