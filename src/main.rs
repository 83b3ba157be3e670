mod alert;
mod config;
mod export;
mod model;
mod monitor;
mod web;

use alert::Notify;
use std::env;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use web::AppState;

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut config_path = "config.json".to_string();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-d" => {
                if i + 1 < args.len() {
                    let dir = &args[i + 1];
                    if let Err(e) = env::set_current_dir(dir) {
                        eprintln!("Failed to change directory to {}: {}", dir, e);
                        std::process::exit(1);
                    }
                    i += 1;
                } else {
                    eprintln!("Missing argument for -d");
                    std::process::exit(1);
                }
            }
            "-c" => {
                if i + 1 < args.len() {
                    config_path = args[i + 1].clone();
                    i += 1;
                } else {
                    eprintln!("Missing argument for -c");
                    std::process::exit(1);
                }
            }
            _ => {}
        }
        i += 1;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "apiwatch=info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 1. Load configuration
    let app_config = match config::load_config(config_path.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return;
        }
    };

    // 2. Set up the notification sink. A broken mail setup must not take
    // the monitor down, so fall back to the noop notifier.
    let notifier: Arc<dyn Notify> = match alert::build_notifier(&app_config.alert) {
        Ok(n) => n,
        Err(e) => {
            tracing::error!("Email alerting unavailable, continuing without it: {}", e);
            Arc::new(alert::NoopNotifier)
        }
    };

    // 3. Initialize monitor state
    let monitor = Arc::new(RwLock::new(monitor::Monitor::with_endpoints(
        app_config.buffer_capacity,
        app_config.endpoints.iter().cloned(),
    )));

    // 4. Create channels
    let (broadcast_tx, _) = broadcast::channel(100);
    let (shutdown_tx, _) = broadcast::channel(1);

    // 5. Start the polling loop
    let poll_monitor = monitor.clone();
    let poll_notifier = notifier.clone();
    let poll_broadcast_tx = broadcast_tx.clone();
    let interval = Duration::from_secs(app_config.poll_interval_secs);
    let probe_timeout = Duration::from_secs(app_config.probe_timeout_secs);
    tokio::spawn(async move {
        monitor::poll_loop(
            poll_monitor,
            poll_notifier,
            poll_broadcast_tx,
            interval,
            probe_timeout,
        )
        .await;
    });

    // 6. Serve the dashboard API
    let app_state = AppState {
        monitor,
        broadcast_tx,
        shutdown_tx: shutdown_tx.clone(),
    };

    let app = web::app(app_state);
    let listener = tokio::net::TcpListener::bind(&app_config.listen_addr)
        .await
        .unwrap();
    tracing::info!("Web server listening on http://{}", app_config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .unwrap();
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
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

    tracing::info!("Shutdown signal received");
    // Close all SSE connections
    let _ = shutdown_tx.send(());
    tracing::info!("Goodbye!");
}
