use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use election_server::dkg::{generate_trustees, DkgService};
use election_server::http::{self, AppState};
use election_server::ordering::SoloOrdering;
use election_server::services::{OrderingService, Pool, TransactionManager};
use evoting_contract::types::Roster;
use evoting_contract::Contract;
use tokio::sync::watch;

/// Command line configuration of the application.
#[derive(Debug, Parser, Clone)]
struct AppConfig {
    /// Address the http server will listen on
    #[clap(
        long = "listen-address",
        default_value = "0.0.0.0:8080",
        env = "EVOTING_LISTEN_ADDRESS"
    )]
    listen_address: std::net::SocketAddr,
    /// Maximum log level
    #[clap(long = "log-level", default_value = "info", env = "EVOTING_LOG_LEVEL")]
    log_level: tracing_subscriber::filter::LevelFilter,
    /// Number of trustees hosted by this dev-cluster node
    #[clap(long = "trustees", default_value = "3", env = "EVOTING_TRUSTEES")]
    trustees: usize,
    /// The request timeout of the http server, in milliseconds
    #[clap(
        long = "request-timeout",
        default_value = "30000",
        env = "EVOTING_REQUEST_TIMEOUT"
    )]
    request_timeout: u64,
    /// How long to wait for a submitted transaction to be ordered, in
    /// milliseconds
    #[clap(
        long = "inclusion-timeout",
        default_value = "10000",
        env = "EVOTING_INCLUSION_TIMEOUT"
    )]
    inclusion_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = AppConfig::parse();

    {
        use tracing_subscriber::prelude::*;
        let log_filter = tracing_subscriber::filter::Targets::new()
            .with_target(module_path!(), args.log_level)
            .with_target("election_server", args.log_level)
            .with_target("tower_http", args.log_level);

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(log_filter)
            .init();
    }

    tracing::info!("Service started with configuration: {:?}", args);

    let trustees = generate_trustees(args.trustees);
    let roster = Roster {
        public_keys: trustees
            .iter()
            .map(|keypair| keypair.public_key().to_bytes().to_vec())
            .collect(),
    };

    let dkg = Arc::new(DkgService::new(trustees.clone()));
    let contract = Contract::new(dkg.clone());
    let (solo, _sequencer) =
        SoloOrdering::start(contract, &roster).context("Failed to start the sequencer")?;

    let ordering: Arc<dyn OrderingService> = solo.clone();
    let pool: Arc<dyn Pool> = solo;
    let manager = Arc::new(TransactionManager::new(ordering.clone()));
    let (shutdown_sender, shutdown) = watch::channel(false);

    let state = AppState {
        ordering,
        pool,
        manager,
        dkg,
        trustees,
        inclusion_timeout: Duration::from_millis(args.inclusion_timeout),
        shutdown,
    };

    let listener = tokio::net::TcpListener::bind(args.listen_address)
        .await
        .with_context(|| {
            format!(
                "Could not create tcp listener on address: {}",
                &args.listen_address
            )
        })?;

    let router = http::router(state)
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(tower_http::trace::DefaultMakeSpan::new())
                .on_response(tower_http::trace::DefaultOnResponse::new()),
        )
        .layer(tower_http::timeout::TimeoutLayer::new(
            Duration::from_millis(args.request_timeout),
        ))
        .layer(tower_http::limit::RequestBodyLimitLayer::new(5_000_000));

    let serve = axum::serve(listener, router).into_future();
    tokio::select! {
        result = serve => result.context("HTTP server has shut down")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            let _ = shutdown_sender.send(true);
        }
    }

    Ok(())
}
