mod chat;
mod config;
mod credentials;
mod error;
mod messages;
mod presence;
mod server;
mod session;
mod store;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use log::{error, info, warn};

use chat::ChatService;
use config::Config;
use error::ConfigError;
use credentials::FileCredentialStore;
use presence::Presence;
use session::SessionIssuer;
use store::FileMessageStore;

/// Checks that the certificate chain and private key parse before handing
/// the paths to warp, which would otherwise panic on bad material.
fn tls_material_is_valid(cert_path: &Path, key_path: &Path) -> bool {
    let cert_file = match File::open(cert_path) {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to open certificate file {}: {}", cert_path.display(), e);
            return false;
        }
    };
    let key_file = match File::open(key_path) {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to open private key file {}: {}", key_path.display(), e);
            return false;
        }
    };

    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file)).collect::<Result<Vec<_>, _>>();
    match certs {
        Ok(certs) if !certs.is_empty() => {}
        Ok(_) => {
            error!("No certificates found in {}", cert_path.display());
            return false;
        }
        Err(e) => {
            error!("Failed to parse certificate: {}", e);
            return false;
        }
    }

    match rustls_pemfile::private_key(&mut BufReader::new(key_file)) {
        Ok(Some(_)) => true,
        Ok(None) => {
            error!("No private key found in {}", key_path.display());
            false
        }
        Err(e) => {
            error!("Failed to parse private key: {}", e);
            false
        }
    }
}

async fn build_service(config: &Config) -> Result<ChatService, Box<dyn std::error::Error>> {
    let secret = match config.secret_bytes()? {
        Some(secret) => secret,
        None => {
            warn!("CHAT_TOKEN_SECRET not set; using a random secret, sessions end on restart");
            Config::generate_secret()
        }
    };
    let ttl = i64::try_from(config.token_ttl_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| ConfigError::Invalid {
            key: "token_ttl_secs",
            reason: "out of range".to_string(),
        })?;
    let sessions = SessionIssuer::new(&secret, ttl)?;
    let credentials = FileCredentialStore::open(&config.data_dir).await?;
    let store = FileMessageStore::open(&config.data_dir).await?;

    Ok(ChatService::new(
        Arc::new(credentials),
        sessions,
        Arc::new(store),
        Presence::new(),
        config.max_content_len,
    ))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let service = match build_service(&config).await {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to start chat service: {}", e);
            std::process::exit(1);
        }
    };

    let routes = server::routes(service);

    match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) if tls_material_is_valid(cert, key) => {
            info!("Starting secure server (HTTPS/WSS) on {}", config.bind);
            let (_, server) = warp::serve(routes)
                .tls()
                .cert_path(cert)
                .key_path(key)
                .bind_with_graceful_shutdown(config.bind, shutdown_signal());
            server.await;
        }
        (cert, key) => {
            if cert.is_some() || key.is_some() {
                warn!("TLS material incomplete or invalid, falling back to HTTP/WS");
            }
            info!("Starting server (HTTP/WS) on {}", config.bind);
            match warp::serve(routes).try_bind_with_graceful_shutdown(config.bind, shutdown_signal()) {
                Ok((_, server)) => server.await,
                Err(e) => {
                    error!("Failed to bind {}: {}", config.bind, e);
                    std::process::exit(1);
                }
            }
        }
    }
}
