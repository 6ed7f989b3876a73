//! CLI bootstrap: settings, logging and the turn service stack.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::ai::embeddings::create_embedding_service;
use crate::ai::llm_client::{create_completion_service, resolve_api_key};
use crate::ai::{AgentSet, TurnService};
use crate::retrieval::{
    KnownGoodStore, LanceKnownGoodStore, MemoryKnownGoodStore, PgKnownGoodStore,
};
use crate::settings::schema::{AiProvider, RetrievalBackend};
use crate::settings::{get_with_env_fallback, KudosSettings, SettingsManager};
use crate::sql::{Database, NoDatabase, PgSandbox, SchemaContext, SqlExecutor};

use super::args::Args;

/// Services owned by one CLI invocation.
pub struct CliContext {
    pub service: Arc<TurnService>,

    pub settings_manager: Arc<SettingsManager>,

    /// Session used for questions; `/new` in the REPL replaces it
    pub session_id: String,

    pub args: Args,

    database: Option<Database>,
}

impl CliContext {
    /// Start a fresh conversation and return its id.
    pub fn new_session(&mut self) -> &str {
        self.session_id = uuid::Uuid::new_v4().to_string();
        &self.session_id
    }

    pub async fn shutdown(self) -> Result<()> {
        if let Some(db) = self.database {
            db.close().await;
        }
        Ok(())
    }
}

/// Initialize settings, logging and the turn service.
pub async fn initialize(args: &Args) -> Result<CliContext> {
    // Install TLS provider (required for rustls 0.23+)
    let _ = rustls::crypto::ring::default_provider().install_default();

    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("[cli] Failed to load .env file: {}", e);
        }
    }

    let settings_manager = Arc::new(match &args.config {
        Some(path) => SettingsManager::with_path(path).await,
        None => SettingsManager::new().await,
    }
    .context("Failed to initialize settings manager")?);

    if args.config.is_none() {
        if let Err(e) = settings_manager.ensure_settings_file().await {
            eprintln!("[cli] Failed to create settings template: {}", e);
        }
    }

    let mut settings = settings_manager.get().await;
    init_logging(args, &settings.advanced.log_level);
    apply_overrides(&mut settings, args)?;

    if args.verbose {
        eprintln!(
            "[cli] Settings loaded from {}",
            settings_manager.path().display()
        );
        eprintln!("[cli] Provider: {}", settings.ai.provider.as_str());
        eprintln!("[cli] Model: {}", settings.ai.model);
    }

    let (service, database) = build_service(&settings, args.api_key.as_deref()).await?;

    Ok(CliContext {
        service: Arc::new(service),
        settings_manager,
        session_id: args.session_id(),
        args: args.clone(),
        database,
    })
}

/// `RUST_LOG` wins; otherwise `--verbose` or the configured level.
fn init_logging(args: &Args, configured_level: &str) {
    let level = if args.verbose { "debug" } else { configured_level };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("warn,kudos_lib={level},kudos_cli={level}"))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn apply_overrides(settings: &mut KudosSettings, args: &Args) -> Result<()> {
    if let Some(provider) = &args.provider {
        settings.ai.provider = parse_provider(provider)?;
    }
    if let Some(model) = &args.model {
        settings.ai.model = model.clone();
    }
    Ok(())
}

fn parse_provider(name: &str) -> Result<AiProvider> {
    match name.trim().to_ascii_lowercase().as_str() {
        "gemini" | "google" => Ok(AiProvider::Gemini),
        "openai" => Ok(AiProvider::OpenAi),
        other => anyhow::bail!("Unknown provider '{}'. Options: gemini, openai", other),
    }
}

/// Build the turn service and, when configured, the database pool it uses.
pub async fn build_service(
    settings: &KudosSettings,
    api_key_override: Option<&str>,
) -> Result<(TurnService, Option<Database>)> {
    let api_key = match api_key_override {
        Some(key) => key.to_string(),
        None => resolve_api_key(&settings.ai)?,
    };

    let llm = create_completion_service(&settings.ai, &api_key)?;
    let embedder = create_embedding_service(
        &settings.embeddings,
        settings.ai.provider,
        Some(&api_key),
        settings.ai.retry_policy(),
    )?;

    let database = match get_with_env_fallback(&settings.database.url, &["DATABASE_URL"], None) {
        Some(url) => Some(
            Database::connect(&settings.database.to_config(url))
                .await
                .context("Failed to connect to database")?,
        ),
        None => {
            tracing::warn!("No database configured; database questions will fail");
            None
        }
    };

    let store = build_store(settings, database.as_ref()).await?;

    let executor: Arc<dyn SqlExecutor> = match &database {
        Some(db) => Arc::new(PgSandbox::new(db.clone(), settings.sandbox.limits())),
        None => Arc::new(NoDatabase),
    };

    let schema = SchemaContext::load(settings.schema.path.as_deref().map(Path::new))
        .context("Failed to load schema context")?;

    let agents = AgentSet::new(
        llm,
        embedder,
        store,
        Arc::new(schema),
        settings.retrieval.top_k,
    );

    let service = TurnService::with_checkpoint_limits(
        agents,
        executor,
        settings.workflow.transition_policy(),
        settings.workflow.auto_promote_known_good,
        settings.workflow.checkpoint_limits(),
    );
    Ok((service, database))
}

async fn build_store(
    settings: &KudosSettings,
    database: Option<&Database>,
) -> Result<Arc<dyn KnownGoodStore>> {
    let dimension = settings.embeddings.effective_dimension();

    let store: Arc<dyn KnownGoodStore> = match settings.retrieval.backend {
        RetrievalBackend::Postgres => {
            let db = database.context(
                "retrieval.backend = \"postgres\" requires database.url or DATABASE_URL",
            )?;
            let store = PgKnownGoodStore::new(db.clone(), &settings.retrieval.table, dimension)?;
            store
                .ensure_schema()
                .await
                .context("Failed to prepare known-good table")?;
            Arc::new(store)
        }
        RetrievalBackend::Lance => {
            let dir = settings.retrieval.data_dir();
            Arc::new(
                LanceKnownGoodStore::open(&dir, dimension)
                    .await
                    .with_context(|| format!("Failed to open known-good store at {}", dir.display()))?,
            )
        }
        RetrievalBackend::Memory => Arc::new(MemoryKnownGoodStore::new()),
    };

    tracing::info!("[retrieval] Known-good store: {}", store.backend());
    Ok(store)
}
