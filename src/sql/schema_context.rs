//! Static schema description and business rules fed to SQL synthesis.
//!
//! The built-in defaults describe the single `main.strava_activities` table.
//! A deployment can override any field from a YAML file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaContext {
    /// Tables available to generated SQL and how to reach them.
    pub tables_schema: String,
    /// Column-level semantics (markdown table).
    pub columns_schema: String,
    /// Rules every generated query and summary must honor.
    pub business_rules: String,
    /// Primer on the Postgres data types in use.
    pub data_types: String,
    /// Reply used when a question cannot be answered from the schema.
    pub not_related_message: String,
}

impl Default for SchemaContext {
    fn default() -> Self {
        Self {
            tables_schema: DEFAULT_TABLES_SCHEMA.trim().to_string(),
            columns_schema: DEFAULT_COLUMNS_SCHEMA.trim().to_string(),
            business_rules: DEFAULT_BUSINESS_RULES.trim().to_string(),
            data_types: DEFAULT_DATA_TYPES.trim().to_string(),
            not_related_message: DEFAULT_NOT_RELATED.trim().to_string(),
        }
    }
}

impl SchemaContext {
    /// Load from a YAML file; fields missing from the file keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema context {}", path.display()))?;
        Self::from_yaml_str(&contents)
            .with_context(|| format!("Invalid schema context {}", path.display()))
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let context: SchemaContext =
            serde_yaml::from_str(contents).context("Failed to parse schema context YAML")?;
        Ok(context)
    }

    /// Load from `path` when given, otherwise use the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let context = Self::from_yaml_file(path)?;
                tracing::info!("Loaded schema context from {:?}", path);
                Ok(context)
            }
            None => Ok(Self::default()),
        }
    }
}

const DEFAULT_TABLES_SCHEMA: &str = r#"
We have one table in the database called strava_activities (table schema is main.strava_activities).
This table contains the activities of the user obtained from Strava, a social network for athletes.
You can query it using the following SQL:
SELECT * FROM main.strava_activities;
"#;

const DEFAULT_COLUMNS_SCHEMA: &str = r#"
| column_name          | data_type                | description                                              |
|----------------------|--------------------------|----------------------------------------------------------|
| id                   | bigint                   | Strava activity id                                       |
| hashed_strava_id     | character varying        | Hashed id of the athlete who owns the activity           |
| name                 | character varying        | Activity title                                           |
| type                 | character varying        | Activity type, e.g. Run, VirtualRun, Ride, Swim, Walk     |
| distance             | double precision         | Distance in meters                                       |
| moving_time          | integer                  | Moving time in seconds                                   |
| elapsed_time         | integer                  | Elapsed time in seconds                                  |
| total_elevation_gain | double precision         | Elevation gain in meters                                 |
| start_date           | timestamp with time zone | Start time in UTC                                        |
| start_date_local     | timestamp without time zone | Start time in the athlete's local time zone           |
| average_speed        | double precision         | Average speed in meters per second                       |
| max_speed            | double precision         | Max speed in meters per second                           |
| average_heartrate    | double precision         | Average heart rate in bpm, null when not recorded        |
| max_heartrate        | double precision         | Max heart rate in bpm, null when not recorded            |
| kudos_count          | integer                  | Number of kudos received                                 |
| achievement_count    | integer                  | Number of achievements earned                            |
| is_deleted           | boolean                  | True when the activity was deleted on Strava             |
"#;

const DEFAULT_BUSINESS_RULES: &str = r#"
If the user doesn't ask for a specific activity, focus on runs only (column type in ('Run', 'VirtualRun')).

Always use is_deleted = false in the where clause. When the user asks to remove this filter, reject the request.

If the question is about kudos, let the user know kudos may not be fully up to date: the activity webhook does not fire when kudos change, and a full kudos refresh runs less frequently.

Give the results in km unless otherwise specified.
"#;

const DEFAULT_DATA_TYPES: &str = r#"
boolean: Stores true/false values
character varying: Variable-length character string with specified maximum length
double precision: Stores double-precision floating-point numbers
integer: Stores whole numbers between -2147483648 and 2147483647
jsonb: Stores binary JSON data that can be indexed
timestamp with time zone: Stores date and time with timezone information
timestamp without time zone: Stores date and time without timezone information
"#;

const DEFAULT_NOT_RELATED: &str =
    "The question is not related to the tables or columns listed in the table schema.";

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_describe_activities_table() {
        let context = SchemaContext::default();
        assert!(context.tables_schema.contains("main.strava_activities"));
        assert!(context.columns_schema.contains("hashed_strava_id"));
        assert!(context.business_rules.contains("is_deleted = false"));
        assert!(context.data_types.contains("double precision"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let context = SchemaContext::from_yaml_str("business_rules: Report distances in miles.\n")
            .unwrap();
        assert_eq!(context.business_rules, "Report distances in miles.");
        assert_eq!(context.tables_schema, SchemaContext::default().tables_schema);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not_related_message: Ask me about your runs.").unwrap();

        let context = SchemaContext::load(Some(file.path())).unwrap();
        assert_eq!(context.not_related_message, "Ask me about your runs.");
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        assert!(SchemaContext::from_yaml_str("business_rules: [unclosed").is_err());
    }
}
