mod config;
mod repl;

use std::sync::Arc;

use tracing::info;

use loadline_backend::BackendServer;
use loadline_chat::ChatClient;

use config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout is the chat
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loadline=info,loadline_chat=debug,loadline_backend=info".into()),
        )
        .init();

    let config = AppConfig::from_env()?;

    let server = BackendServer::open(&config.db_path, config.backend())?;
    info!(path = %config.db_path.display(), "Database opened");

    if let Some(admin) = &config.admin {
        let id = server
            .provision_admin(&admin.email, &admin.password, &admin.name)
            .await?;
        info!(user_id = %id, "Administrator ready");
    }

    let client = ChatClient::new(Arc::new(server.connect()), config.chat());
    let view = client.open_view();

    let result = repl::run(&client, &view).await;

    view.close();
    client.shutdown().await;
    result
}
