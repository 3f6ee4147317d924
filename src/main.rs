use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use release_dash::cache::LocalCache;
use release_dash::config::{Config, LogFormat, LoggingConfig};
use release_dash::dashboard::{Dashboard, DashboardOptions, RefreshKind};
use release_dash::scm::{GithubAdapter, Retrier};
use release_dash::web::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config.logging);

    let shutdown = CancellationToken::new();

    let retrier = Retrier::new(
        config.github.retry_max_attempts,
        config.github.retry_min_delay,
        config.github.retry_max_delay,
        shutdown.clone(),
    );
    let scm = GithubAdapter::new(
        &config.github.url_default,
        &config.github.pat,
        config.github.request_timeout,
        retrier,
    )?;
    if config.github.pat.is_empty() {
        tracing::warn!("GITHUB_PAT is not set, requests will be unauthenticated");
    }

    let cache = LocalCache::new(config.cache.default_expiration);
    let janitor = cache.spawn_janitor(config.cache.cleanup_interval, shutdown.clone());

    let dashboard = Arc::new(Dashboard::new(
        Arc::new(scm),
        Arc::new(cache),
        DashboardOptions {
            user: config.github.user.clone(),
            config_path: config.dashboard_config_path.clone(),
        },
        shutdown.clone(),
    ));

    let background = vec![
        dashboard.spawn_refresh_loop(RefreshKind::Repos, config.github.repo_fetch_interval),
        dashboard.spawn_refresh_loop(
            RefreshKind::Changelogs,
            config.github.changelog_fetch_interval,
        ),
        janitor,
    ];

    let app = web::router(AppState { dashboard });

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("release-dash listening on {}", addr);

    tokio::spawn(wait_for_signal(shutdown.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    shutdown.cancel();
    let drained = tokio::time::timeout(config.server.shutdown_timeout, async {
        for handle in background {
            if let Err(e) = handle.await {
                tracing::error!("Background task failed: {}", e);
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            "Background tasks still running after {:?}, exiting anyway",
            config.server.shutdown_timeout
        );
    }

    tracing::info!("release-dash stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| logging.level.clone()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Could not install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown requested");
    shutdown.cancel();
}
