use anyhow::Context;
use todo_api::{build_app, config::AppConfig, db::sweep::spawn_purge, serve, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "todo_api=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env().context("invalid configuration")?;
    if config.ai.is_none() {
        tracing::info!("OPENAI_API_KEY not set; /ai will answer 503");
    }

    let server = config.server.clone();
    let app_state = AppState::init(config).await?;
    let purge = spawn_purge(app_state.store.clone(), server.purge_interval());

    let result = serve(build_app(app_state), server.addr()).await;
    purge.abort();
    result
}
