//! Relational access: the Postgres wrapper, the read-only guard, the
//! sandboxed executor for generated SQL, and the schema context.

pub mod database;
pub mod guard;
pub mod sandbox;
pub mod schema_context;

pub use database::{Database, DatabaseConfig, SqlParam};
pub use guard::{ensure_scoped, validate_read_only_sql, GuardrailViolation};
pub use sandbox::{ExecutionOutcome, NoDatabase, PgSandbox, SandboxLimits, SqlExecutor};
pub use schema_context::SchemaContext;
