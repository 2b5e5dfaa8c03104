mod auth;
mod email;
mod error;
mod model;
mod prompt;
mod rate_limiters;
mod request_tracing;
mod routes;
mod server_config;
mod state;
mod storage;
mod testing;
mod util;

use std::{env, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use auth::session_store::AuthSessionStore;
use axum::{extract::FromRef, Router};
use email::client::RetryPolicies;
use mimalloc::MiMalloc;
use prompt::{GeminiClient, TextGenerator};
use rate_limiters::RateLimiters;
use routes::AppRouter;
use server_config::{cfg, Settings};
use state::{CategorizationStore, GmailQuotaMap};
use tokio::{signal, task::JoinHandle};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;
pub type SharedTextGenerator = Arc<dyn TextGenerator>;

/// Directory holding saved category and folder snapshots.
#[derive(Clone, Debug)]
pub struct StorageDir(pub Arc<PathBuf>);

#[derive(Clone, FromRef)]
struct ServerState {
    http_client: HttpClient,
    rate_limiters: RateLimiters,
    session_store: AuthSessionStore,
    categorization_store: CategorizationStore,
    gmail_quotas: GmailQuotaMap,
    text_generator: SharedTextGenerator,
    storage_dir: StorageDir,
    settings: Arc<Settings>,
    retry: RetryPolicies,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .init();

    let http_client = reqwest::ClientBuilder::new().use_rustls_tls().build()?;
    let rate_limiters = RateLimiters::from_env();
    let text_generator: SharedTextGenerator = Arc::new(GeminiClient::new(
        http_client.clone(),
        rate_limiters.clone(),
        &cfg.ai,
    ));

    let state = ServerState {
        http_client,
        rate_limiters,
        session_store: AuthSessionStore::new(cfg.session.ttl_secs),
        categorization_store: CategorizationStore::new(),
        gmail_quotas: GmailQuotaMap::new(),
        text_generator,
        storage_dir: StorageDir(Arc::new(PathBuf::from(&cfg.storage.dir))),
        settings: Arc::new(cfg.settings.clone()),
        retry: cfg.retry.policies(),
    };

    let router = AppRouter::create(state.clone());

    let mut scheduler = JobScheduler::new().await?;

    {
        // Cleanup session storage
        let session_store = state.session_store.clone();
        let gmail_quotas = state.gmail_quotas.clone();
        scheduler
            .add(Job::new_repeated(
                Duration::from_secs(cfg.session.sweep_interval_secs),
                move |_uuid, _lock| {
                    session_store.clean_store();
                    gmail_quotas.sweep_idle();
                },
            )?)
            .await?;

        // Forget finished categorization jobs nobody came back for
        let categorization_store = state.categorization_store.clone();
        let max_age = chrono::Duration::seconds(cfg.categorization.job_max_age_secs);
        scheduler
            .add(Job::new_repeated(
                Duration::from_secs(cfg.categorization.sweep_interval_secs),
                move |_uuid, _lock| {
                    categorization_store.sweep(max_age);
                },
            )?)
            .await?;
    }

    scheduler.set_shutdown_handler(Box::new(move || {
        Box::pin(async move {
            tracing::info!("Shutting down scheduler");
        })
    }));

    match scheduler.start().await {
        Ok(_) => {
            println!("-------- SCHEDULER STARTED --------");
        }
        Err(e) => {
            println!("Failed to start scheduler: {:?}", e);
        }
    }

    run_server(router, scheduler).await??;

    Ok(())
}

async fn shutdown_signal(mut scheduler: JobScheduler) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
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

    if let Err(e) = scheduler.shutdown().await {
        tracing::error!("Scheduler shutdown failed: {:?}", e);
    }
    println!("Cleanups done, shutting down");
}

fn run_server(router: Router, scheduler: JobScheduler) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async {
        let port = env::var("PORT").unwrap_or("5000".to_string());
        tracing::info!("Mailsort server running on http://0.0.0.0:{}", port);
        // check config
        println!("{}", *server_config::cfg);

        let addr = SocketAddr::from(([0, 0, 0, 0], port.parse::<u16>()?));
        tracing::debug!("listening on {addr}");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;

        Ok::<(), anyhow::Error>(())
    })
}
