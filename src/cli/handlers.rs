use super::commands::CallCommand;
use crate::config::{LoggingSettings, Settings};
use crate::engine::Engine;
use crate::shutdown::ShutdownCoordinator;
use anyhow::{Context, Result};
use arrow_flight::flight_service_client::FlightServiceClient;
use arrow_flight::{Action, Empty};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_PREFIX: &str = "aiengine.log";

/// Install the global subscriber: stderr, plus a daily rolling file when
/// `logging.dir` is set. Keep the returned guard alive to flush the file.
pub fn init_logging(logging: &LoggingSettings) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            logging
                .level
                .parse::<LevelFilter>()
                .unwrap_or(LevelFilter::INFO)
                .into(),
        )
        .parse_lossy(logging.filter.as_deref().unwrap_or(""));

    let (file_layer, guard) = match &logging.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(guard)
}

/// Serve the engine until a signal, the parent exiting, or a requested stop,
/// then tear it down.
pub async fn run_server(settings: Settings) -> Result<()> {
    let addr = settings.listen_addr()?;
    let coordinator = ShutdownCoordinator::new();
    let mut engine = Engine::builder(settings.clone())
        .with_shutdown(coordinator.clone())
        .start()
        .context("Failed to start engine")?;

    tokio::spawn(coordinator.clone().watch_signals());
    if settings.shutdown.watch_parent {
        let poll = Duration::from_millis(settings.shutdown.parent_poll_ms);
        tokio::spawn(coordinator.clone().watch_parent(poll));
    }

    let mut server =
        Server::builder().concurrency_limit_per_connection(settings.server.max_concurrent_requests);
    if let (Some(cert), Some(key)) = (&settings.server.tls_cert, &settings.server.tls_key) {
        let cert = tokio::fs::read(cert)
            .await
            .with_context(|| format!("Failed to read TLS certificate {}", cert.display()))?;
        let key = tokio::fs::read(key)
            .await
            .with_context(|| format!("Failed to read TLS key {}", key.display()))?;
        server = server
            .tls_config(ServerTlsConfig::new().identity(Identity::from_pem(cert, key)))
            .context("Invalid TLS configuration")?;
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, tls = settings.server.tls_cert.is_some(), "Serving engine");

    let mut stop = coordinator.listener();
    let served = server
        .add_service(engine.flight_service().into_server())
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            stop.wait().await
        })
        .await;

    if let Some(reason) = coordinator.reason() {
        info!(%reason, "Shutting down");
    }
    // Tear down even when serving failed.
    let stopped = engine.shutdown().await;
    served.context("Server error")?;
    stopped.context("Engine shutdown failed")?;
    Ok(())
}

/// Run one action against a running engine and print its JSON response.
/// Without an action, list the actions the engine offers.
pub async fn run_call(cmd: CallCommand) -> Result<()> {
    let mut client = FlightServiceClient::connect(cmd.endpoint.clone())
        .await
        .with_context(|| format!("Failed to connect to {}", cmd.endpoint))?;

    let Some(action) = cmd.action else {
        let mut actions = client.list_actions(Empty {}).await?.into_inner();
        while let Some(action) = actions.message().await? {
            println!("{:<20} {}", action.r#type, action.description);
        }
        return Ok(());
    };

    let body = cmd.body.unwrap_or_default();
    if !body.is_empty() {
        serde_json::from_str::<serde_json::Value>(&body).context("Request body is not valid JSON")?;
    }
    let mut results = client
        .do_action(Action {
            r#type: action,
            body: body.into_bytes().into(),
        })
        .await?
        .into_inner();

    let mut received = false;
    while let Some(result) = results.message().await? {
        received = true;
        println!("{}", String::from_utf8_lossy(&result.body));
    }
    if !received {
        warn!("Engine returned no result");
    }
    Ok(())
}
