//! Hosting server: accept loop, per-request dispatch and the metrics listener.

use super::client::{create_http_client, Upstream};
use super::controller::{ProxyController, ProxyProfile};
use super::forwarding::{error_response, forward_to_application};
use super::headers::{SwitchyardHeadersExt, X_SWITCHYARD_RULE, X_SWITCHYARD_TARGET};
use super::network::create_listener;
use super::response_ext::ResponseExt;
use super::tls::create_tls_acceptor;
use crate::campaign::create_campaign_store;
use crate::config::{Application, Config, Protocol};
use crate::metrics;
use crate::predicate::MatchContext;
use crate::request::RequestView;
use crate::routing::{Router, SharedRouter};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderName;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info};

/// Where a request goes once routing has decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Forward unchanged to a named application
    Application(String),
    /// Run a named rewriting proxy profile
    Proxy(String),
}

impl Target {
    pub fn name(&self) -> &str {
        match self {
            Target::Application(name) | Target::Proxy(name) => name,
        }
    }
}

pub struct SwitchyardServer {
    config: Arc<Config>,
    router: SharedRouter<Target>,
    applications: HashMap<String, Application>,
    proxies: HashMap<String, ProxyProfile>,
    upstream: Arc<dyn Upstream>,
    /// Only used for applications flagged `tls_skip_verify`
    insecure_upstream: Arc<dyn Upstream>,
    controller: ProxyController,
    match_ctx: MatchContext,
    client_ip_header: Option<HeaderName>,
    trusted_proxies: usize,
}

impl SwitchyardServer {
    /// Build the server from a validated configuration.
    pub fn new(config: Config) -> Result<Self, anyhow::Error> {
        let upstream: Arc<dyn Upstream> =
            Arc::new(create_http_client(&config.connection_pool, false));
        let insecure_upstream: Arc<dyn Upstream> = if config.should_skip_tls_verify() {
            Arc::new(create_http_client(&config.connection_pool, true))
        } else {
            Arc::clone(&upstream)
        };
        Self::with_upstreams(config, upstream, insecure_upstream)
    }

    /// Build the server around a caller-supplied upstream transport.
    pub fn with_upstream(config: Config, upstream: Arc<dyn Upstream>) -> Result<Self, anyhow::Error> {
        let insecure_upstream = Arc::clone(&upstream);
        Self::with_upstreams(config, upstream, insecure_upstream)
    }

    /// Build the server with separate transports for verified and
    /// `tls_skip_verify` applications. Proxy profiles always use `upstream`.
    pub fn with_upstreams(
        config: Config,
        upstream: Arc<dyn Upstream>,
        insecure_upstream: Arc<dyn Upstream>,
    ) -> Result<Self, anyhow::Error> {
        config.validate()?;

        let applications: HashMap<String, Application> = config
            .applications
            .iter()
            .map(|app| (app.name.clone(), app.clone()))
            .collect();

        let mut proxies = HashMap::new();
        for proxy in &config.proxies {
            proxies.insert(proxy.name.clone(), ProxyProfile::from_config(proxy)?);
        }

        let router = Router::from_config(&config.routing, |name| {
            if applications.contains_key(name) {
                Some(Target::Application(name.to_string()))
            } else if proxies.contains_key(name) {
                Some(Target::Proxy(name.to_string()))
            } else {
                None
            }
        })?;

        let campaigns = create_campaign_store(&config.campaigns)?;
        let match_ctx = MatchContext::new(
            campaigns,
            Duration::from_millis(config.campaigns.lookup_timeout_ms),
        );

        let controller = ProxyController::new(
            Arc::clone(&upstream),
            Duration::from_secs(config.connection_pool.upstream_timeout_secs),
        )
        .with_max_buffered_body(config.connection_pool.max_buffered_body_bytes);

        Ok(Self {
            client_ip_header: config.client_ip_header(),
            trusted_proxies: config.listen.trusted_proxies,
            config: Arc::new(config),
            router: SharedRouter::new(router),
            applications,
            proxies,
            upstream,
            insecure_upstream,
            controller,
            match_ctx,
        })
    }

    /// Replace the routing table. In-flight requests finish on the old one.
    pub fn publish_router(&self, router: Router<Target>) {
        self.router.publish(router);
    }

    /// Bind the configured port and serve until the listener fails.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.listen.port));
        let listener = create_listener(addr)?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self, listener: tokio::net::TcpListener) -> Result<(), anyhow::Error> {
        let protocol = self.config.listen.protocol;
        let tls_acceptor = if protocol == Protocol::Https {
            let tls_config =
                self.config.listen.tls.as_ref().ok_or_else(|| {
                    anyhow::anyhow!("TLS configuration required for HTTPS listener")
                })?;
            Some(create_tls_acceptor(
                &tls_config.cert_path,
                &tls_config.key_path,
            )?)
        } else {
            None
        };

        let local_addr = listener.local_addr()?;
        info!("Listening on {}://{}", protocol.as_str(), local_addr);
        info!(
            "Loaded {} applications, {} proxy profiles, {} routing rules (default: {})",
            self.applications.len(),
            self.proxies.len(),
            self.router.current().len(),
            self.router.current().default_target().name()
        );

        if self.config.metrics.port != 0 {
            let metrics_addr = SocketAddr::from(([0, 0, 0, 0], self.config.metrics.port));
            tokio::spawn(async move {
                if let Err(e) = run_metrics_server(metrics_addr).await {
                    error!("Metrics listener failed: {}", e);
                }
            });
        }

        let server = Arc::new(self);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let server = Arc::clone(&server);

            match tls_acceptor.clone() {
                Some(acceptor) => {
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                serve_connection(server, tls_stream, remote_addr, "https").await
                            }
                            Err(err) => {
                                error!("TLS handshake failed from {}: {}", remote_addr, err);
                            }
                        }
                    });
                }
                None => {
                    tokio::spawn(serve_connection(server, stream, remote_addr, "http"));
                }
            }
        }
    }

    /// Route one request and produce its response. Never fails: errors are
    /// turned into JSON error responses.
    pub async fn handle_request<B>(
        &self,
        req: Request<B>,
        peer: Option<IpAddr>,
        scheme: &str,
    ) -> Response<BoxBody<Bytes, hyper::Error>>
    where
        B: hyper::body::Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
    {
        let view = RequestView::from_request(&req, peer)
            .with_scheme(scheme)
            .with_client_ip_header(self.client_ip_header.as_ref(), self.trusted_proxies);

        let router = self.router.current();
        let decision = router.resolve(&view, &self.match_ctx).await;
        let mut rule = decision.rule.map(str::to_string);
        let mut target = decision.target;

        if let Target::Proxy(name) = target {
            if let Some(profile) = self.proxies.get(name) {
                if profile.engages(&view, &self.match_ctx).await {
                    let response = self.run_proxy(profile, &view, req).await;
                    return finish(response, name, rule.as_deref());
                }
                debug!(profile = %name, "proxy filter did not match, falling back to default target");
                target = router.default_target();
                rule = None;
            }
        }

        let name = target.name().to_string();
        let response = match target {
            Target::Application(app_name) => match self.applications.get(app_name) {
                Some(app) => {
                    let upstream = if app.tls_skip_verify {
                        self.insecure_upstream.as_ref()
                    } else {
                        self.upstream.as_ref()
                    };
                    forward_to_application(
                        upstream,
                        self.controller.timeout(),
                        app,
                        &view,
                        req,
                    )
                    .await
                }
                None => {
                    error!("Routing target '{}' is not a configured application", app_name);
                    error_response(StatusCode::BAD_GATEWAY, "Unknown target").into_boxed()
                }
            },
            Target::Proxy(proxy_name) => match self.proxies.get(proxy_name) {
                // The default target is used as-is, without consulting its filter
                Some(profile) => self.run_proxy(profile, &view, req).await,
                None => {
                    error!("Routing target '{}' is not a configured proxy", proxy_name);
                    error_response(StatusCode::BAD_GATEWAY, "Unknown target").into_boxed()
                }
            },
        };
        finish(response, &name, rule.as_deref())
    }

    async fn run_proxy<B>(
        &self,
        profile: &ProxyProfile,
        view: &RequestView,
        req: Request<B>,
    ) -> Response<BoxBody<Bytes, hyper::Error>>
    where
        B: hyper::body::Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
    {
        let body = BoxBody::new(req.into_body());
        match self.controller.proxy(view, body, profile).await {
            Ok(mut response) => {
                response.set_header_value(&X_SWITCHYARD_TARGET, &profile.name);
                response
            }
            Err(e) => {
                error!(profile = %profile.name, "Proxy exchange failed: {}", e);
                metrics::record_proxy_error(&profile.name, e.kind());
                error_response(e.status_code(), &e.to_string()).into_boxed()
            }
        }
    }
}

fn finish(
    mut response: Response<BoxBody<Bytes, hyper::Error>>,
    target: &str,
    rule: Option<&str>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    if let Some(rule) = rule {
        response.set_header_value(&X_SWITCHYARD_RULE, rule);
    }
    metrics::record_request(target, response.status().as_u16());
    response
}

async fn serve_connection<S>(server: Arc<SwitchyardServer>, stream: S, remote_addr: SocketAddr, scheme: &'static str)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: Request<Incoming>| {
        let server = Arc::clone(&server);
        async move {
            Ok::<_, Infallible>(
                server
                    .handle_request(req, Some(remote_addr.ip()), scheme)
                    .await,
            )
        }
    });

    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
        error!(
            "Error serving {} connection from {}: {}",
            scheme, remote_addr, err
        );
    }
}

async fn run_metrics_server(addr: SocketAddr) -> Result<(), anyhow::Error> {
    let listener = create_listener(addr)?;
    info!("Metrics available at http://{}/metrics", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        tokio::spawn(async move {
            let service = service_fn(|req: Request<Incoming>| async move {
                Ok::<_, Infallible>(metrics_response(req.method(), req.uri().path()))
            });
            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Metrics connection error: {}", err);
            }
        });
    }
}

fn metrics_response(method: &Method, path: &str) -> Response<Full<Bytes>> {
    if method == Method::GET && path == "/metrics" {
        let mut response = Response::new(Full::new(Bytes::from(metrics::collect_metrics())));
        response.headers_mut().insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
        );
        response
    } else {
        error_response(StatusCode::NOT_FOUND, "Not Found")
    }
}
