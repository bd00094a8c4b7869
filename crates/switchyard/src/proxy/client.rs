//! Shared upstream HTTP client.

use super::tls::NoVerifier;
use crate::config::ConnectionPoolConfig;
use crate::error::BoxError;
use async_trait::async_trait;
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::{Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, BoxBody<Bytes, hyper::Error>>;

/// Something that can carry an outbound request upstream.
///
/// The proxy controller talks to this trait rather than to the pooled
/// client, so tests can substitute a canned upstream.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(
        &self,
        req: Request<BoxBody<Bytes, hyper::Error>>,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, BoxError>;
}

#[async_trait]
impl Upstream for HttpClient {
    async fn send(
        &self,
        req: Request<BoxBody<Bytes, hyper::Error>>,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, BoxError> {
        let response = self.request(req).await?;
        Ok(response.map(|body| body.boxed()))
    }
}

/// Install the ring crypto provider as the process default. Safe to call
/// more than once.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Create a pooled HTTP/1.1 client.
///
/// With `skip_verify` the client accepts any server certificate. The server
/// builds such a client only for applications flagged `tls_skip_verify`
/// and keeps it apart from the verifying one.
pub fn create_http_client(pool: &ConnectionPoolConfig, skip_verify: bool) -> HttpClient {
    install_crypto_provider();

    let mut http_connector = HttpConnector::new();
    http_connector.set_keepalive(Some(Duration::from_secs(pool.keepalive_timeout_secs)));
    http_connector.set_connect_timeout(Some(Duration::from_secs(pool.connect_timeout_secs)));
    http_connector.enforce_http(false);

    let https_connector = if skip_verify {
        warn!("TLS certificate verification DISABLED for flagged applications (development/testing only)");
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(
                rustls::ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerifier))
                    .with_no_client_auth(),
            )
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector)
    } else {
        match hyper_rustls::HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder.https_or_http().enable_http1().wrap_connector(http_connector),
            Err(e) => {
                warn!("Failed to load native root certificates, HTTPS upstreams will fail verification: {}", e);
                hyper_rustls::HttpsConnectorBuilder::new()
                    .with_tls_config(
                        rustls::ClientConfig::builder()
                            .with_root_certificates(rustls::RootCertStore::empty())
                            .with_no_client_auth(),
                    )
                    .https_or_http()
                    .enable_http1()
                    .wrap_connector(http_connector)
            }
        }
    };

    let http_client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(pool.idle_timeout_secs))
        .pool_max_idle_per_host(pool.max_idle_per_host)
        .build(https_connector);

    info!(
        "Connection pool configured (HTTP/1.1): max_idle={}, idle_timeout={}s, keepalive={}s, verify_tls={}",
        pool.max_idle_per_host,
        pool.idle_timeout_secs,
        pool.keepalive_timeout_secs,
        !skip_verify
    );

    http_client
}
