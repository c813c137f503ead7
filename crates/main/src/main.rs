//! 主应用程序入口
//!
//! 加载配置，装配基础设施，启动 Axum Web 服务。

use std::sync::Arc;

use anyhow::Context;
use application::{ChatService, ChatServiceDependencies, ChatSettings, SystemClock};
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    tracing::info!(
        storage = ?config.storage.backend,
        presence = ?config.presence.backend,
        broadcast = ?config.broadcast.backend,
        "configuration loaded"
    );

    let infrastructure = Infrastructure::connect(&config)
        .await
        .context("failed to connect infrastructure")?;

    let chat_service = ChatService::new(ChatServiceDependencies {
        registry: infrastructure.registry,
        typing: infrastructure.typing,
        event_log: infrastructure.event_log,
        broadcaster: infrastructure.broadcaster,
        clock: Arc::new(SystemClock::default()),
        settings: ChatSettings {
            history_limit: config.chat.history_limit,
            store_timeout: config.chat.store_timeout(),
            ..ChatSettings::default()
        },
    });

    let app = router(AppState::new(Arc::new(chat_service)));
    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    tracing::info!("聊天服务启动在 http://{address}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到关闭信号");
}
