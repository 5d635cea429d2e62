use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use collective::api::{self, ApiState};
use collective::cli;
use collective::collective::Collective;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "collective=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse args and env vars
    let args = cli::Cli::parse();
    let socket_address = args.socket_address()?;
    let auth = args.authenticator()?;
    let (cluster_settings, federation_settings) = args.into_settings()?;

    let cluster = Collective::builder(cluster_settings)
        .authenticator(auth.clone())
        .build()?;
    let federation = match federation_settings {
        Some(settings) => Some(
            Collective::builder(settings)
                .authenticator(auth.clone())
                .build()?,
        ),
        None => None,
    };
    if let Some(federation) = &federation {
        Collective::nest(&cluster, federation)?;
    }

    let api = api::api(ApiState::new(cluster.clone(), federation.clone()));

    // Bootstrap runs in the background and retries until a seed answers
    cluster.start()?;
    if let Some(federation) = &federation {
        federation.start()?;
    }

    info!("Starting Collective on {}", socket_address);
    axum::Server::bind(&socket_address)
        .serve(api.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let peers know our members are gone before exiting
    let mut dispatch = cluster.shutdown();
    if let Some(federation) = &federation {
        dispatch.extend(federation.shutdown());
    }
    dispatch.settled().await;
    cluster.stopped().await;
    if let Some(federation) = &federation {
        federation.stopped().await;
    }
    info!("Collective stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
