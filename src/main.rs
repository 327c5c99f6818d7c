use std::{process, sync::Arc};

use roamcache::{
    application::error::AppError,
    cache::{
        CacheConfig, CacheState, CloudflarePurger, InvalidationCoordinator, InvalidationReport,
        MemoryPageStore, PageStore,
    },
    config::{self, StoreBackend},
    domain::invalidation::content_registry,
    infra::{
        db::PostgresPageStore,
        error::InfraError,
        http::{self, InternalState, UpstreamRenderer},
        telemetry,
    },
};
use tokio::{sync::watch, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Clear(_) => run_clear(settings).await,
        config::Command::Purge(args) => run_purge(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = init_store(&settings).await?;
    let coordinator = Arc::new(build_coordinator(&settings, store.clone())?);

    let cache_state = CacheState::new(CacheConfig::from(&settings.cache), store);
    let renderer = Arc::new(UpstreamRenderer::new(&settings.upstream)?);

    let webhook_token = settings.internal.webhook_token.as_deref().map(Arc::from);
    if webhook_token.is_none() {
        warn!(
            target = "roamcache::serve",
            addr = %settings.server.internal_addr,
            "internal.webhook_token is not set; internal endpoints accept unauthenticated requests"
        );
    }

    let public_router = http::build_public_router(cache_state, renderer);
    let internal_router = http::build_internal_router(InternalState {
        coordinator,
        webhook_token,
    });

    serve_http(&settings, public_router, internal_router).await
}

async fn run_clear(settings: config::Settings) -> Result<(), AppError> {
    let store = init_store(&settings).await?;
    let coordinator = build_coordinator(&settings, store)?;

    let report = coordinator.clear_all().await?;
    print_report(&report)
}

async fn run_purge(settings: config::Settings, args: config::PurgeArgs) -> Result<(), AppError> {
    let prefix = args.prefix.trim();
    if !prefix.starts_with('/') {
        return Err(AppError::validation("--prefix must start with `/`"));
    }

    let store = init_store(&settings).await?;
    let coordinator = build_coordinator(&settings, store)?;

    let report = coordinator.purge_prefix(prefix).await?;
    print_report(&report)
}

fn print_report(report: &InvalidationReport) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(report)
        .map_err(|err| AppError::unexpected(format!("failed to encode report: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn init_store(settings: &config::Settings) -> Result<Arc<dyn PageStore>, AppError> {
    match settings.cache.store {
        StoreBackend::Memory => {
            info!(target = "roamcache::store", "Using in-process page store");
            Ok(Arc::new(MemoryPageStore::new()))
        }
        StoreBackend::Postgres => {
            let database_url = settings
                .database
                .url
                .as_ref()
                .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

            let pool =
                PostgresPageStore::connect(database_url, settings.database.max_connections.get())
                    .await
                    .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

            PostgresPageStore::run_migrations(&pool)
                .await
                .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

            info!(target = "roamcache::store", "Using Postgres page store");
            Ok(Arc::new(PostgresPageStore::new(pool)))
        }
    }
}

fn build_coordinator(
    settings: &config::Settings,
    store: Arc<dyn PageStore>,
) -> Result<InvalidationCoordinator, AppError> {
    let coordinator = InvalidationCoordinator::new(store, Arc::new(content_registry()));

    if !settings.deployment.production {
        info!(
            target = "roamcache::cdn",
            "CDN purging disabled outside production"
        );
        return Ok(coordinator);
    }

    match settings.cdn.cloudflare() {
        Some(cloudflare) => {
            let purger = CloudflarePurger::new(cloudflare)
                .map_err(|err| AppError::from(InfraError::cdn(err.to_string())))?;
            Ok(coordinator.with_cdn(Arc::new(purger)))
        }
        None => {
            warn!(
                target = "roamcache::cdn",
                "Production deployment without cdn.zone_id, cdn.api_token and cdn.site_domain; edge purges are skipped"
            );
            Ok(coordinator)
        }
    }
}

async fn serve_http(
    settings: &config::Settings,
    public_router: axum::Router,
    internal_router: axum::Router,
) -> Result<(), AppError> {
    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let internal_listener = tokio::net::TcpListener::bind(settings.server.internal_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "roamcache::serve",
        public = %settings.server.public_addr,
        internal = %settings.server.internal_addr,
        "Listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let internal_server = axum::serve(internal_listener, internal_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));

    let servers = async { try_join!(public_server, internal_server) };
    let grace = settings.server.graceful_shutdown;
    let deadline = async move {
        wait_for_shutdown(shutdown_rx).await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = servers => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = deadline => {
            warn!(
                target = "roamcache::serve",
                grace_secs = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
        }
    }

    info!(target = "roamcache::serve", "Shut down");
    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(target = "roamcache::serve", "Shutdown signal received");
}
