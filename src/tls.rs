//! 可选的 HTTPS 证书加载。

use axum_server::tls_rustls::RustlsConfig;
use std::io;
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

use crate::config::Args;

/// 证书与私钥需同时提供；均未提供时不启用 HTTPS。
pub async fn load_rustls_config(args: &Args) -> io::Result<Option<RustlsConfig>> {
    let (cert_path, key_path) = match (&args.tls_cert, &args.tls_key) {
        (Some(cert), Some(key)) => (PathBuf::from(cert), PathBuf::from(key)),
        (None, None) => return Ok(None),
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "--tls-cert and --tls-key must be given together",
            ));
        }
    };

    let cert = fs::read(&cert_path).await?;
    let key = fs::read(&key_path).await?;
    info!(cert = ?cert_path, "loaded TLS certificate");
    RustlsConfig::from_pem(cert, key).await.map(Some)
}
