use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use nl_gate::config::{AppConfig, CliArgs};
use nl_gate::db::db_pool::build_pool;
use nl_gate::db::executor::DuckDbExecutor;
use nl_gate::engine::generator::DynamicSqlGenerator;
use nl_gate::engine::learning::LearnedQueryStore;
use nl_gate::engine::monitor::QueryMonitor;
use nl_gate::engine::resolver::HybridResolver;
use nl_gate::engine::templates::{TemplateCatalog, TemplateMatcher};
use nl_gate::engine::validator::QueryValidator;
use nl_gate::llm::LlmManager;
use nl_gate::schema::{ConceptIndex, SchemaManager, SchemaProvider};
use nl_gate::util::logging::init_tracing;
use nl_gate::web::{self, state::AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    init_tracing(&config.logging);

    // Ensure data directory exists
    if !config.data_dir.is_empty() {
        let data_dir = PathBuf::from(&config.data_dir);
        if !data_dir.exists() {
            info!("Creating data directory: {}", config.data_dir);
            std::fs::create_dir_all(&data_dir)?;
        }
    }

    info!("Initializing DuckDB connection pool");
    let pool = build_pool(
        &config.database.connection_string,
        config.database.pool_size as u32,
    )?;

    let concepts = ConceptIndex::default();
    let schema_manager = Arc::new(SchemaManager::new(
        pool.clone(),
        concepts.clone(),
        config.generator.core_tables.clone(),
    ));
    match schema_manager.refresh_cache().await {
        Ok(count) => info!("Schema cache holds {} tables", count),
        // Continue anyway; table names go unchecked until a refresh loads the schema
        Err(e) => error!("Failed to initialize schema cache: {}", e),
    }
    let schema: Arc<dyn SchemaProvider> = schema_manager.clone();

    let validator = Arc::new(QueryValidator::new(
        config.validator.clone(),
        Some(schema.clone()),
    ));
    let monitor = Arc::new(QueryMonitor::new(
        config.monitor.clone(),
        &config.breaker,
    ));
    let executor = Arc::new(DuckDbExecutor::new(
        pool.clone(),
        config.database.execution_timeout(),
    ));

    let export_path = config.data_path(&config.learning.export_path);
    let catalog = Arc::new(TemplateCatalog::with_builtin(Some(export_path.clone())));
    catalog.reload_promoted();
    info!(
        "Template catalog loaded: {} templates ({} promoted)",
        catalog.len(),
        catalog.promoted_count()
    );
    let matcher = Arc::new(TemplateMatcher::new(catalog, &config.templates));

    let mut resolver = HybridResolver::new(
        matcher,
        validator.clone(),
        monitor,
        executor,
        schema.clone(),
        &config.cache,
        config.templates.match_threshold,
    );

    if config.generator.enabled && config.llm.backend != "disabled" {
        info!("Initializing LLM manager with backend: {}", config.llm.backend);
        let llm = Arc::new(LlmManager::new(&config.llm)?);
        resolver = resolver.with_generator(Arc::new(DynamicSqlGenerator::new(
            llm,
            validator,
            schema,
            concepts,
            &config.generator,
        )));
    } else {
        warn!("Dynamic SQL generation disabled");
    }

    if config.learning.enabled {
        let store_path = config.data_path(&config.learning.store_path);
        info!("Opening learned-query store at {}", store_path.display());
        let store_pool = build_pool(&store_path.to_string_lossy(), 2)?;
        let store = LearnedQueryStore::open(store_pool, &config.learning, Some(export_path))?;
        resolver = resolver.with_learning(Arc::new(store));
    }

    let app_state = Arc::new(AppState::new(Arc::new(resolver), Some(schema_manager)));

    // Start the web server
    info!("Starting NL-Gate server on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
