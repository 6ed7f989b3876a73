//! Read-only statement guard applied before any generated SQL reaches the database.

use thiserror::Error;

/// Reason a statement was refused without being executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardrailViolation {
    #[error("SQL query is empty; provide a SELECT statement")]
    Empty,

    #[error("Multi-statement SQL is not allowed; submit exactly one read-only statement")]
    MultiStatement,

    #[error("Mutating SQL keyword `{0}` is not allowed")]
    MutatingKeyword(String),

    #[error("Only SELECT, WITH ... SELECT and EXPLAIN SELECT statements are allowed (got `{0}`)")]
    UnsupportedStatement(String),

    #[error("Query must filter on hashed_strava_id = '{0}'")]
    MissingScope(String),
}

const MUTATING_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "merge", "create", "alter", "drop", "truncate", "grant",
    "revoke", "copy", "vacuum", "reindex", "analyze", "cluster", "begin", "commit", "rollback",
    "savepoint", "listen", "notify", "refresh",
];

/// Accept exactly one read-only statement.
pub fn validate_read_only_sql(raw_sql: &str) -> Result<(), GuardrailViolation> {
    let without_comments = strip_comments(raw_sql);
    let candidate = strip_trailing_semicolons(&without_comments);
    if candidate.is_empty() {
        return Err(GuardrailViolation::Empty);
    }

    let normalized = candidate.to_ascii_lowercase();
    let code = blank_literals(&normalized);

    if code.contains(';') {
        return Err(GuardrailViolation::MultiStatement);
    }

    if let Some(keyword) = first_mutating_keyword(&code) {
        return Err(GuardrailViolation::MutatingKeyword(keyword));
    }

    let allowed = normalized.starts_with("select")
        || normalized.starts_with("with")
        || normalized.starts_with("explain select")
        || normalized.starts_with('(');
    if !allowed {
        return Err(GuardrailViolation::UnsupportedStatement(
            leading_keyword(&normalized).to_string(),
        ));
    }

    Ok(())
}

/// Require a statement that reads a table to mention the caller's scope id.
///
/// Statements without a `FROM` clause (such as the constant not-related
/// reply) read no user data and pass unchanged.
pub fn ensure_scoped(sql: &str, scope_id: &str) -> Result<(), GuardrailViolation> {
    if scope_id.is_empty() || sql.contains(scope_id) || !reads_table(sql) {
        Ok(())
    } else {
        Err(GuardrailViolation::MissingScope(scope_id.to_string()))
    }
}

fn reads_table(sql: &str) -> bool {
    let code = blank_literals(&strip_comments(sql).to_ascii_lowercase());
    let reads = code_tokens(&code).any(|token| token == "from");
    reads
}

/// The statement with trailing semicolons and comments removed, ready for wrapping.
pub fn executable_body(raw_sql: &str) -> String {
    strip_trailing_semicolons(&strip_comments(raw_sql)).to_string()
}

fn strip_trailing_semicolons(raw_sql: &str) -> &str {
    let mut candidate = raw_sql.trim();
    while let Some(stripped) = candidate.strip_suffix(';') {
        candidate = stripped.trim_end();
    }
    candidate
}

/// Remove `--` line comments and `/* */` block comments outside string literals.
fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if c == '\'' {
                in_string = false;
            }
            continue;
        }
        match c {
            '\'' => {
                in_string = true;
                out.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}

/// Replace the contents of string literals and quoted identifiers with spaces.
///
/// A doubled quote inside a literal closes and reopens it, so escaped quotes
/// need no special case.
fn blank_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;

    for c in sql.chars() {
        match quote {
            Some(open) if c == open => {
                quote = None;
                out.push(c);
            }
            Some(_) => out.push(' '),
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }

    out
}

fn code_tokens(code: &str) -> impl Iterator<Item = &str> {
    code.split(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_')
        .filter(|token| !token.is_empty())
}

fn first_mutating_keyword(code: &str) -> Option<String> {
    code_tokens(code)
        .find_map(|token| {
            MUTATING_KEYWORDS
                .contains(&token)
                .then_some(token.to_string())
        })
}

fn leading_keyword(normalized_sql: &str) -> &str {
    normalized_sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_accepts_select_and_cte() {
        assert!(validate_read_only_sql("SELECT 1").is_ok());
        assert!(validate_read_only_sql("select max(distance) from main.strava_activities;").is_ok());
        assert!(validate_read_only_sql(
            "WITH runs AS (SELECT * FROM main.strava_activities) SELECT count(*) FROM runs"
        )
        .is_ok());
        assert!(validate_read_only_sql("-- longest run\nSELECT 1").is_ok());
    }

    #[test]
    fn test_rejects_mutations() {
        assert_eq!(
            validate_read_only_sql("DELETE FROM main.strava_activities"),
            Err(GuardrailViolation::MutatingKeyword("delete".into()))
        );
        assert_eq!(
            validate_read_only_sql("WITH x AS (UPDATE t SET a = 1 RETURNING *) SELECT * FROM x"),
            Err(GuardrailViolation::MutatingKeyword("update".into()))
        );
    }

    #[test]
    fn test_rejects_multi_statement() {
        assert_eq!(
            validate_read_only_sql("SELECT 1; SELECT 2"),
            Err(GuardrailViolation::MultiStatement)
        );
    }

    #[test]
    fn test_rejects_empty_and_unsupported() {
        assert_eq!(validate_read_only_sql("  ;; "), Err(GuardrailViolation::Empty));
        assert_eq!(validate_read_only_sql("/* only a comment */"), Err(GuardrailViolation::Empty));
        assert_eq!(
            validate_read_only_sql("SHOW search_path"),
            Err(GuardrailViolation::UnsupportedStatement("show".into()))
        );
    }

    #[test]
    fn test_comment_markers_inside_strings_are_kept() {
        assert_eq!(
            executable_body("SELECT '--not a comment' AS x;"),
            "SELECT '--not a comment' AS x"
        );
    }

    #[test]
    fn test_keywords_inside_literals_are_data() {
        let sql = "SELECT distance FROM main.strava_activities \
                   WHERE hashed_strava_id = 'abc123' AND is_deleted = false \
                   AND name ILIKE '%commute update%'";
        assert!(validate_read_only_sql(sql).is_ok());

        assert!(validate_read_only_sql(
            "SELECT count(*) FROM main.strava_activities WHERE name = 'Don''t drop; commit!'"
        )
        .is_ok());
        assert!(validate_read_only_sql(r#"SELECT "update" FROM t"#).is_ok());
    }

    #[test]
    fn test_keywords_after_literals_are_still_checked() {
        assert_eq!(
            validate_read_only_sql("SELECT 'it''s fine' AS x; DROP TABLE t"),
            Err(GuardrailViolation::MultiStatement)
        );
        assert_eq!(
            validate_read_only_sql("WITH x AS (DELETE FROM t WHERE name = 'a' RETURNING *) SELECT * FROM x"),
            Err(GuardrailViolation::MutatingKeyword("delete".into()))
        );
    }

    #[test]
    fn test_scope_check() {
        let sql = "SELECT * FROM main.strava_activities WHERE hashed_strava_id = 'abc123'";
        assert!(ensure_scoped(sql, "abc123").is_ok());
        assert_eq!(
            ensure_scoped("SELECT max(distance) FROM main.strava_activities", "abc123"),
            Err(GuardrailViolation::MissingScope("abc123".into()))
        );
    }

    #[test]
    fn test_statements_without_tables_need_no_scope() {
        assert!(ensure_scoped("SELECT 1", "abc123").is_ok());
        assert!(ensure_scoped(
            "SELECT 'Ask me about your activities, e.g. from last week.' AS message",
            "abc123"
        )
        .is_ok());
        assert!(ensure_scoped("-- from a comment\nSELECT now()", "abc123").is_ok());
    }

    proptest! {
        #[test]
        fn prop_mutating_prefix_always_rejected(
            keyword in prop::sample::select(vec!["INSERT", "update", "Delete", "DROP", "alter", "truncate"]),
            rest in "[a-z ]{0,30}",
        ) {
            let sql = format!("{keyword} {rest}");
            prop_assert!(validate_read_only_sql(&sql).is_err());
        }
    }
}
