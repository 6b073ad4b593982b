//! Dev server binary: env-configured runtime over SQLite checkpoints and an
//! in-memory conversation store.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use serve::{router, AppState};
use triage::{AgentRuntime, InMemoryConversationStore, OpenAiBroker, SqliteCheckpointStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    let model = std::env::var("TRIAGE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    let db_path = std::env::var("TRIAGE_DB").unwrap_or_else(|_| "triage.db".into());
    let addr = std::env::var("TRIAGE_ADDR").unwrap_or_else(|_| "127.0.0.1:8787".into());

    let broker = Arc::new(OpenAiBroker::new(api_key, model));
    let checkpoints = Arc::new(SqliteCheckpointStore::new(&db_path)?);
    let conversations = Arc::new(InMemoryConversationStore::new());

    let runtime = Arc::new(AgentRuntime::new(broker, conversations, checkpoints));
    let state = Arc::new(AppState::new(runtime));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, db = %db_path, "triage serve listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
