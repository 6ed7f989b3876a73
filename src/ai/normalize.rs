//! Normalization applied to every raw model output before it is interpreted.

/// Trim surrounding whitespace and strip markdown code fences.
///
/// A line consisting only of a fence (optionally followed by a language tag,
/// e.g. "```sql" or "```html") is dropped; any other fence marker is removed
/// in place. Applying this twice yields the same result as applying it once.
pub fn normalize_output(raw: &str) -> String {
    strip_code_fences(raw)
}

pub fn strip_code_fences(text: &str) -> String {
    let kept: Vec<String> = text
        .trim()
        .lines()
        .filter(|line| !is_fence_line(line))
        .map(|line| line.replace("```", ""))
        .collect();

    kept.join("\n").trim().to_string()
}

fn is_fence_line(line: &str) -> bool {
    let trimmed = line.trim();
    match trimmed.strip_prefix("```") {
        Some(tag) => tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+')),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strips_sql_fence() {
        let raw = "```sql\nSELECT * FROM main.strava_activities\n```\n";
        assert_eq!(strip_code_fences(raw), "SELECT * FROM main.strava_activities");
    }

    #[test]
    fn test_strips_html_fence() {
        let raw = "  ```html\n<div>chart</div>\n```  ";
        assert_eq!(normalize_output(raw), "<div>chart</div>");
    }

    #[test]
    fn test_strips_inline_fence() {
        assert_eq!(strip_code_fences("```SELECT 1```"), "SELECT 1");
    }

    #[test]
    fn test_keeps_interior_lines() {
        let raw = "```\nSELECT a,\n  b\nFROM t\n```";
        assert_eq!(strip_code_fences(raw), "SELECT a,\n  b\nFROM t");
    }

    #[test]
    fn test_trims_plain_text() {
        assert_eq!(normalize_output("  DATABASE\n"), "DATABASE");
        assert_eq!(normalize_output(""), "");
    }

    proptest! {
        #[test]
        fn prop_strip_is_idempotent(s in "(```[a-z]{0,4}\n)?[ -~\n]{0,80}(\n```)?") {
            let once = strip_code_fences(&s);
            let twice = strip_code_fences(&once);
            prop_assert_eq!(&once, &twice);
        }

        #[test]
        fn prop_output_has_no_fences(s in "[ -~\n]{0,80}") {
            prop_assert!(!strip_code_fences(&s).contains("```"));
        }
    }
}
