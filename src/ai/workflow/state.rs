//! Per-turn conversation state and the patch reducer that mutates it.
//!
//! Every node returns a [`StatePatch`]; the engine folds it into the
//! [`ConversationState`] it owns for the turn. The message log is appended to,
//! every other field is overwritten when the patch carries a value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ai::normalize::strip_code_fences;

/// Author of a message in the conversation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Outcome of classifying a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    Database,
    General,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Database => "DATABASE",
            QuestionType::General => "GENERAL",
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chart kinds the visualization step may pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Table,
    Bullet,
    Bar,
    Column,
    Line,
    Area,
    Pie,
    Scatter,
    Bubble,
    Histogram,
    Map,
    Gantt,
    Heatmap,
}

impl ChartKind {
    pub const ALL: [ChartKind; 13] = [
        ChartKind::Table,
        ChartKind::Bullet,
        ChartKind::Bar,
        ChartKind::Column,
        ChartKind::Line,
        ChartKind::Area,
        ChartKind::Pie,
        ChartKind::Scatter,
        ChartKind::Bubble,
        ChartKind::Histogram,
        ChartKind::Map,
        ChartKind::Gantt,
        ChartKind::Heatmap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Table => "table",
            ChartKind::Bullet => "bullet",
            ChartKind::Bar => "bar",
            ChartKind::Column => "column",
            ChartKind::Line => "line",
            ChartKind::Area => "area",
            ChartKind::Pie => "pie",
            ChartKind::Scatter => "scatter",
            ChartKind::Bubble => "bubble",
            ChartKind::Histogram => "histogram",
            ChartKind::Map => "map",
            ChartKind::Gantt => "gantt",
            ChartKind::Heatmap => "heatmap",
        }
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        ChartKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == needle)
            .ok_or_else(|| format!("unknown chart kind '{}'", s.trim()))
    }
}

/// Rows returned by a successful execution, or a textual placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecuteSqlResult {
    Rows {
        rows: Vec<serde_json::Value>,
        truncated: bool,
    },
    Placeholder { text: String },
}

impl Default for ExecuteSqlResult {
    fn default() -> Self {
        ExecuteSqlResult::Placeholder {
            text: String::new(),
        }
    }
}

impl ExecuteSqlResult {
    pub fn placeholder(text: impl Into<String>) -> Self {
        ExecuteSqlResult::Placeholder { text: text.into() }
    }

    pub fn rows(&self) -> &[serde_json::Value] {
        match self {
            ExecuteSqlResult::Rows { rows, .. } => rows,
            ExecuteSqlResult::Placeholder { .. } => &[],
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, ExecuteSqlResult::Rows { truncated: true, .. })
    }

    /// Render for inclusion in a prompt.
    pub fn to_prompt_text(&self) -> String {
        match self {
            ExecuteSqlResult::Rows { rows, truncated } => {
                let body = serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string());
                if *truncated {
                    format!("{body}\n(result truncated to {} rows)", rows.len())
                } else {
                    body
                }
            }
            ExecuteSqlResult::Placeholder { text } => text.clone(),
        }
    }
}

/// State of one conversation turn.
///
/// Only `messages` survives from one turn to the next; everything else is
/// reset by [`ConversationState::for_new_turn`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<ChatMessage>,
    pub user_question: String,
    pub question_type: Option<QuestionType>,
    pub scope_id: String,
    pub retrieved_context: String,
    pub sql_query: String,
    pub execute_sql_status: bool,
    pub execute_sql_result: ExecuteSqlResult,
    pub execute_sql_error: String,
    pub debug_counter: u32,
    pub response_text: String,
    pub visualization_kind: Option<ChartKind>,
    pub visualization_code: String,
}

impl ConversationState {
    /// Fresh turn state carrying over the previous message log.
    pub fn for_new_turn(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Content of the most recent user message, if any.
    pub fn latest_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Fold a patch into this state.
    pub fn apply(&mut self, patch: StatePatch) {
        self.messages.extend(patch.messages);

        if let Some(v) = patch.user_question {
            self.user_question = v;
        }
        if let Some(v) = patch.question_type {
            self.question_type = Some(v);
        }
        if let Some(v) = patch.scope_id {
            self.scope_id = v;
        }
        if let Some(v) = patch.retrieved_context {
            self.retrieved_context = v;
        }
        if let Some(v) = patch.sql_query {
            self.sql_query = strip_code_fences(&v);
        }
        if let Some(v) = patch.execute_sql_status {
            self.execute_sql_status = v;
        }
        if let Some(v) = patch.execute_sql_result {
            self.execute_sql_result = v;
        }
        if let Some(v) = patch.execute_sql_error {
            self.execute_sql_error = v;
        }
        if patch.bump_debug_counter {
            self.debug_counter += 1;
        }
        if let Some(v) = patch.response_text {
            self.response_text = v;
        }
        if let Some(v) = patch.visualization_kind {
            self.visualization_kind = v;
        }
        if let Some(v) = patch.visualization_code {
            self.visualization_code = v;
        }
    }
}

/// Partial update produced by a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatePatch {
    /// Appended to the message log.
    pub messages: Vec<ChatMessage>,
    pub user_question: Option<String>,
    pub question_type: Option<QuestionType>,
    pub scope_id: Option<String>,
    pub retrieved_context: Option<String>,
    /// Fence-stripped when applied.
    pub sql_query: Option<String>,
    pub execute_sql_status: Option<bool>,
    pub execute_sql_result: Option<ExecuteSqlResult>,
    pub execute_sql_error: Option<String>,
    /// Increments `debug_counter` by one. Only the debug step sets this.
    pub bump_debug_counter: bool,
    pub response_text: Option<String>,
    /// `Some(None)` clears the chart kind.
    pub visualization_kind: Option<Option<ChartKind>>,
    pub visualization_code: Option<String>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_user_question(mut self, question: impl Into<String>) -> Self {
        self.user_question = Some(question.into());
        self
    }

    pub fn with_question_type(mut self, question_type: QuestionType) -> Self {
        self.question_type = Some(question_type);
        self
    }

    pub fn with_scope_id(mut self, scope_id: impl Into<String>) -> Self {
        self.scope_id = Some(scope_id.into());
        self
    }

    pub fn with_retrieved_context(mut self, context: impl Into<String>) -> Self {
        self.retrieved_context = Some(context.into());
        self
    }

    pub fn with_sql_query(mut self, sql: impl Into<String>) -> Self {
        self.sql_query = Some(sql.into());
        self
    }

    pub fn with_execution(
        mut self,
        status: bool,
        result: ExecuteSqlResult,
        error: Option<String>,
    ) -> Self {
        self.execute_sql_status = Some(status);
        self.execute_sql_result = Some(result);
        if let Some(error) = error {
            self.execute_sql_error = Some(error);
        }
        self
    }

    pub fn bump_debug_counter(mut self) -> Self {
        self.bump_debug_counter = true;
        self
    }

    pub fn with_response_text(mut self, text: impl Into<String>) -> Self {
        self.response_text = Some(text.into());
        self
    }

    pub fn with_visualization(mut self, kind: Option<ChartKind>, code: impl Into<String>) -> Self {
        self.visualization_kind = Some(kind);
        self.visualization_code = Some(code.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_turn_keeps_only_messages() {
        let mut state = ConversationState::for_new_turn(vec![ChatMessage::user("hi")]);
        state.apply(
            StatePatch::new()
                .with_sql_query("SELECT 1")
                .with_response_text("one")
                .bump_debug_counter(),
        );

        let next = ConversationState::for_new_turn(state.messages.clone());
        assert_eq!(next.messages, vec![ChatMessage::user("hi")]);
        assert!(next.sql_query.is_empty());
        assert!(next.response_text.is_empty());
        assert_eq!(next.debug_counter, 0);
        assert!(next.question_type.is_none());
    }

    #[test]
    fn test_messages_are_appended() {
        let mut state = ConversationState::for_new_turn(vec![ChatMessage::user("first")]);
        state.apply(StatePatch::new().with_message(ChatMessage::assistant("reply")));
        state.apply(StatePatch::new().with_message(ChatMessage::user("second")));

        let contents: Vec<&str> = state.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "reply", "second"]);
        assert_eq!(state.latest_user_message(), Some("second"));
    }

    #[test]
    fn test_sql_query_is_fence_stripped_on_apply() {
        let mut state = ConversationState::default();
        state.apply(StatePatch::new().with_sql_query("```sql\nSELECT 1\n```"));
        assert_eq!(state.sql_query, "SELECT 1");
    }

    #[test]
    fn test_execution_error_kept_when_patch_has_none() {
        let mut state = ConversationState::default();
        state.apply(StatePatch::new().with_execution(
            false,
            ExecuteSqlResult::placeholder("failed"),
            Some("syntax error".into()),
        ));
        state.apply(StatePatch::new().with_execution(
            true,
            ExecuteSqlResult::Rows {
                rows: vec![],
                truncated: false,
            },
            None,
        ));

        assert!(state.execute_sql_status);
        assert_eq!(state.execute_sql_error, "syntax error");
    }

    #[test]
    fn test_visualization_can_be_cleared() {
        let mut state = ConversationState::default();
        state.apply(StatePatch::new().with_visualization(Some(ChartKind::Bar), "<div/>"));
        state.apply(StatePatch::new().with_visualization(None, ""));
        assert_eq!(state.visualization_kind, None);
        assert!(state.visualization_code.is_empty());
    }

    #[test]
    fn test_chart_kind_parsing() {
        assert_eq!("bar".parse::<ChartKind>(), Ok(ChartKind::Bar));
        assert_eq!(" Heatmap ".parse::<ChartKind>(), Ok(ChartKind::Heatmap));
        assert!("donut".parse::<ChartKind>().is_err());
        assert!("".parse::<ChartKind>().is_err());
    }

    #[test]
    fn test_question_type_serializes_as_label() {
        let json = serde_json::to_string(&QuestionType::Database).unwrap();
        assert_eq!(json, "\"DATABASE\"");
    }

    proptest! {
        #[test]
        fn prop_message_log_only_grows(batches in proptest::collection::vec(0usize..4, 0..8)) {
            let mut state = ConversationState::default();
            let mut expected = 0usize;
            for (i, n) in batches.into_iter().enumerate() {
                let mut patch = StatePatch::new();
                for j in 0..n {
                    patch = patch.with_message(ChatMessage::user(format!("{i}-{j}")));
                }
                let before = state.messages.clone();
                state.apply(patch);
                expected += n;
                prop_assert_eq!(&state.messages[..before.len()], &before[..]);
                prop_assert_eq!(state.messages.len(), expected);
            }
        }

        #[test]
        fn prop_debug_counter_counts_bumps(bumps in proptest::collection::vec(any::<bool>(), 0..10)) {
            let mut state = ConversationState::default();
            let expected = bumps.iter().filter(|b| **b).count() as u32;
            for bump in bumps {
                let patch = if bump { StatePatch::new().bump_debug_counter() } else { StatePatch::new() };
                state.apply(patch);
            }
            prop_assert_eq!(state.debug_counter, expected);
        }
    }
}
