use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use twitter_relay::admission::{AdmissionController, PolicyTable};
use twitter_relay::analytics::stats::Stats;
use twitter_relay::config::{Config, LogFormat};
use twitter_relay::error::AppError;
use twitter_relay::http::create_http_client;
use twitter_relay::processor::Worker;
use twitter_relay::tools::ToolDispatcher;
use twitter_relay::transport::{StdioTransport, Transport};
use twitter_relay::twitter::{SessionStore, TwitterClient};

/// How long in-flight calls may keep running after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_logging(&config);

    info!("Starting Twitter relay...");
    match (&config.username, &config.email) {
        (Some(username), _) => info!("Account: @{}", username),
        (None, Some(email)) => info!("Account: {}", email),
        (None, None) => info!("Account: taken from the session cache"),
    }
    info!(
        "Admission: {}s window, {} configured endpoints, sensitive: {:?}",
        config.admission.window_secs,
        config.admission.limits.len(),
        config.admission.sensitive_endpoints
    );

    // 1. Admission control
    let stats = Arc::new(Stats::new());
    let policies = PolicyTable::from_settings(&config.admission)?;
    let controller = Arc::new(AdmissionController::new(policies).with_stats(stats.clone()));

    // 2. Remote API
    let http = create_http_client(
        Duration::from_secs(config.timeout_secs),
        config.user_agent.as_deref(),
    )?;
    let sessions = SessionStore::new(config.session_path.clone(), config.access_token.clone());
    let api = Arc::new(TwitterClient::new(http, &config.api_url, sessions)?);

    // 3. Transport
    let transport = Arc::new(StdioTransport::stdio());
    let rx_requests = transport
        .take_request_receiver()
        .ok_or_else(|| AppError::Init("Request receiver already taken".to_string()))?;
    let tx_responses = transport
        .response_sender()
        .ok_or_else(|| AppError::Init("Transport already started".to_string()))?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let transport_clone = transport.clone();
    let shutdown_rx = shutdown_tx.subscribe();
    let mut transport_handle = tokio::spawn(async move {
        if let Err(e) = transport_clone.run(shutdown_rx).await {
            error!("Transport error: {}", e);
        }
    });

    // 4. Worker
    let dispatcher = Arc::new(ToolDispatcher::new(controller.clone(), api, stats.clone()));
    let worker = Worker::new(dispatcher, rx_requests, tx_responses, config.max_in_flight);
    tokio::spawn(async move {
        worker.run().await;
    });

    // 5. Periodic stats
    let stats_clone = stats.clone();
    let controller_clone = controller.clone();
    let stats_interval = Duration::from_secs(config.stats_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(stats_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            stats_clone.log_stats();
            for (endpoint, count) in controller_clone.snapshot().await {
                info!("USAGE: {} = {}", endpoint, count);
            }
        }
    });

    info!("Relay ready on stdin/stdout.");

    tokio::select! {
        _ = &mut transport_handle => {
            info!("Input finished.");
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutting down...");
            let _ = shutdown_tx.send(());
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut transport_handle).await.is_err() {
                warn!("In-flight requests did not finish within {:?}", SHUTDOWN_GRACE);
            }
        }
    }

    stats.log_stats();
    Ok(())
}

/// Logs go to stderr; stdout carries the protocol.
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
