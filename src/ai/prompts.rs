//! Prompt templates for the turn agents.
//!
//! Each function returns a `(system, user)` pair. Prompt wording is a sensible
//! default; deployments tune the schema context rather than these templates.

use crate::ai::workflow::state::ChartKind;
use crate::sql::schema_context::SchemaContext;

/// Appended to the question so generated SQL is bound to one athlete.
pub fn scope_instruction(scope_id: &str) -> String {
    format!(", Use hashed_strava_id = '{scope_id}' in the where clause.")
}

pub fn classify(question: &str) -> (String, String) {
    let system = r#"You route questions for a personal sports-data assistant.
Answer with exactly one word: DATABASE or GENERAL.
DATABASE: the question needs the user's own activity data (runs, rides, distances, paces, kudos, dates).
GENERAL: greetings, questions about the assistant, or anything answerable without the user's data."#
        .to_string();

    let user = format!(
        r#"<question>
{question}
</question>

Category:"#
    );

    (system, user)
}

pub fn answer_general(question: &str) -> (String, String) {
    let system = r#"You are Kenny, a personal assistant that gives insights on the user's Strava data.
If the user asks for a summary or a dashboard, direct them to the Telegram bot.
Answer based on the user's message. Do not hallucinate and never make up workout data."#
        .to_string();

    (system, question.to_string())
}

/// Inputs for SQL synthesis.
pub struct BuildSqlContext<'a> {
    pub question: &'a str,
    pub scope_id: &'a str,
    pub retrieved_context: &'a str,
    pub schema: &'a SchemaContext,
}

pub fn build_sql(ctx: &BuildSqlContext<'_>) -> (String, String) {
    let system = format!(
        r#"You are a PostgreSQL expert writing a single read-only SELECT statement.
Return only the SQL, without explanation.
If the question cannot be answered from the schema, return: SELECT '{not_related}' AS message

<tables>
{tables}
</tables>

<columns>
{columns}
</columns>

<data_types>
{data_types}
</data_types>

<business_rules>
{rules}
</business_rules>"#,
        not_related = ctx.schema.not_related_message.replace('\'', "''"),
        tables = ctx.schema.tables_schema,
        columns = ctx.schema.columns_schema,
        data_types = ctx.schema.data_types,
        rules = ctx.schema.business_rules,
    );

    let examples = if ctx.retrieved_context.trim().is_empty() {
        "No similar questions on record.".to_string()
    } else {
        ctx.retrieved_context.trim().to_string()
    };

    let user = format!(
        r#"<similar_queries>
{examples}
</similar_queries>

<question>
{question}{scope}
</question>

SQL:"#,
        question = ctx.question,
        scope = scope_instruction(ctx.scope_id),
    );

    (system, user)
}

pub fn debug_sql(question: &str, sql: &str, error: &str) -> (String, String) {
    let system = r#"You are a PostgreSQL expert fixing a query that failed to execute.
Keep the intent and every filter of the original query, including the athlete and is_deleted filters.
Return only the corrected SQL, without explanation."#
        .to_string();

    let user = format!(
        r#"<question>
{question}
</question>

<failing_sql>
{sql}
</failing_sql>

<error>
{error}
</error>

Corrected SQL:"#
    );

    (system, user)
}

pub fn summarize_sql_result(
    question: &str,
    sql_result: &str,
    sql: &str,
    business_rules: &str,
) -> (String, String) {
    let system = format!(
        r#"You turn SQL results into a short, friendly answer for an athlete.
Only use the numbers in the result. Convert units when the rules say so.

<business_rules>
{business_rules}
</business_rules>"#
    );

    let user = format!(
        r#"<question>
{question}
</question>

<sql>
{sql}
</sql>

<result>
{sql_result}
</result>

Answer:"#
    );

    (system, user)
}

pub fn choose_visualization(question: &str, sql: &str) -> (String, String) {
    let kinds = ChartKind::ALL
        .iter()
        .map(|k| format!("\"{}\"", k.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    let system = format!(
        r#"You pick the most suitable chart for a question and the SQL that answers it.
Allowed chart types: {kinds}, or "" when no chart helps (e.g. a single number).
Respond with JSON only: {{"chart_type": "<type>"}}"#
    );

    let user = format!(
        r#"<question>
{question}
</question>

<sql>
{sql}
</sql>"#
    );

    (system, user)
}

pub fn generate_visualization(
    question: &str,
    sql: &str,
    sql_result: &str,
    kind: ChartKind,
) -> (String, String) {
    let system = format!(
        r#"You write a self-contained HTML snippet rendering a {kind} chart.
Embed the data inline; do not fetch anything. Return only the HTML."#
    );

    let user = format!(
        r#"<question>
{question}
</question>

<sql>
{sql}
</sql>

<rows>
{sql_result}
</rows>"#
    );

    (system, user)
}
