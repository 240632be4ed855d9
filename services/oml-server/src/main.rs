use std::env;
use std::sync::Arc;

use oml_backend::InMemoryBackendFactory;
use oml_server::{Session, TableRegistry};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3003".to_owned());

    let registry = Arc::new(TableRegistry::new(InMemoryBackendFactory::new()));
    let listener = TcpListener::bind(&bind_addr).await.expect("failed to bind");
    info!(addr = %bind_addr, "server listening");

    tokio::select! {
        _ = accept_loop(listener, registry) => {},
        _ = shutdown_signal() => { info!("received shutdown signal, exiting"); },
    }
    info!("server shut down gracefully");
}

async fn accept_loop(listener: TcpListener, registry: Arc<TableRegistry<InMemoryBackendFactory>>) {
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                info!(%addr, "accepted connection");
                let registry = registry.clone();
                tokio::spawn(async move {
                    handle_connection(socket, registry).await;
                    info!(%addr, "connection closed");
                });
            }
            Err(error) => {
                warn!(%error, "failed to accept connection");
            }
        }
    }
}

async fn handle_connection(mut socket: tokio::net::TcpStream, registry: Arc<TableRegistry<InMemoryBackendFactory>>) {
    let mut session = Session::new(registry);
    let mut buf = [0u8; 8192];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(error) => {
                warn!(%error, "read failed, dropping connection");
                return;
            }
        };
        match session.feed(&buf[..n]).await {
            Ok(events) => {
                for event in events {
                    info!(?event, "ingested");
                }
            }
            Err(error) => {
                warn!(%error, "protocol error, dropping connection");
                return;
            }
        }
    }
}

/// Waits for SIGTERM or Ctrl-C (SIGINT), logging a SIGUSR1-triggered memory
/// report in the meantime, and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    #[cfg(unix)]
    let memory_report = async {
        let mut usr1 =
            signal::unix::signal(signal::unix::SignalKind::user_defined1()).expect("failed to install SIGUSR1 handler");
        loop {
            usr1.recv().await;
            info!("SIGUSR1 received: memory report not implemented for the in-memory backend");
        }
    };
    #[cfg(not(unix))]
    let memory_report = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
        _ = memory_report => {},
    }
}
