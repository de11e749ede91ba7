//! Application state wiring the engine to its infrastructure.
//!
//! The engine is generic over its state store; AppState pins it to the
//! SQLite store in the data directory.

use std::path::PathBuf;
use std::sync::Arc;

use stepwise_core::engine::Engine;
use stepwise_core::llm::box_port::BoxLlmPort;
use stepwise_infra::actions::builtin_registry;
use stepwise_infra::config::{load_engine_config, resolve_data_dir};
use stepwise_infra::llm::openai_compat::OpenAiCompatGenerator;
use stepwise_infra::sqlite::pool::DatabasePool;
use stepwise_infra::sqlite::state_store::SqliteStateStore;
use stepwise_types::config::EngineConfig;

pub type ConcreteEngine = Engine<SqliteStateStore>;

/// Shared application state used by every command handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: ConcreteEngine,
    pub config: EngineConfig,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Initialize the application state: load config, open the DB, wire the engine.
    pub async fn init(data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir(data_dir);

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_engine_config(&data_dir).await;

        let db_pool = DatabasePool::open_in(&data_dir).await?;
        let store = Arc::new(SqliteStateStore::new(db_pool.clone()));

        let actions = builtin_registry(&config)?;

        // Workflows without llm_call steps run fine without a key, so a
        // missing provider only fails the steps that need it.
        let llm = match OpenAiCompatGenerator::from_settings(&config.llm) {
            Ok(generator) => Some(BoxLlmPort::new(generator)),
            Err(err) => {
                tracing::debug!("LLM provider unavailable: {err}");
                None
            }
        };

        let engine = Engine::new(store, actions, llm, config.clone());

        tracing::debug!(data_dir = %data_dir.display(), "Application state initialized");

        Ok(Self {
            engine,
            config,
            data_dir,
            db_pool,
        })
    }

    /// Close the database pools.
    pub async fn shutdown(&self) {
        self.db_pool.close().await;
    }
}
