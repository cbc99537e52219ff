use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use bbox_relay::chat::engine::ChatManager;
use bbox_relay::config::Config;
use bbox_relay::http::{self, AppState};
use bbox_relay::profiles::ProfileStore;
use bbox_relay::session::SessionManager;
use bbox_relay::{rtc, tls};

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let _ = dotenvy::dotenv();
    let config = Arc::new(Config::from_env().context("failed to load configuration")?);

    let bind_addr: SocketAddr = config.http_address.parse().context("invalid HTTP_ADDRESS")?;

    let sessions = SessionManager::new();
    let chat = ChatManager::new(&config.chat);
    let profiles = Arc::new(ProfileStore::new(config.stream_profile_path.clone(), config.stream_profile_policy_strict));
    let api = Arc::new(rtc::build_api().context("failed to build WebRTC API")?);

    let state = AppState { config: config.clone(), sessions, chat, profiles, api };
    let app = http::create_router(state);

    if !config.use_ssl {
        tracing::info!(%bind_addr, "starting bbox-relay (plain HTTP)");
        let listener = TcpListener::bind(bind_addr).await.with_context(|| format!("failed to bind {bind_addr}"))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")?;
        return Ok(());
    }

    let tls_config = tls::build_tls_config(config.ssl_cert.as_deref(), config.ssl_key.as_deref())?;
    let acceptor = tls::make_acceptor(tls_config);

    let listener = TcpListener::bind(bind_addr).await.with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(%bind_addr, "starting bbox-relay (TLS)");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(err) => {
                        tracing::warn!(%err, "failed to accept TCP connection");
                        continue;
                    }
                };

                let acceptor = acceptor.clone();
                let app = app.clone();

                tokio::spawn(async move {
                    let tls_stream = match tokio::time::timeout(Duration::from_secs(10), acceptor.accept(stream)).await {
                        Ok(Ok(stream)) => stream,
                        Ok(Err(err)) => {
                            tracing::debug!(%peer_addr, %err, "TLS handshake failed");
                            return;
                        }
                        Err(_) => {
                            tracing::debug!(%peer_addr, "TLS handshake timed out");
                            return;
                        }
                    };

                    let io = hyper_util::rt::TokioIo::new(tls_stream);
                    let hyper_service = hyper_util::service::TowerToHyperService::new(app);
                    let builder = hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new());

                    if let Err(err) = builder.serve_connection_with_upgrades(io, hyper_service).await {
                        tracing::debug!(%peer_addr, %err, "connection error");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
