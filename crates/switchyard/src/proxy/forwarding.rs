//! Transparent forwarding to downstream applications.

use super::client::Upstream;
use super::headers::{
    is_hop_by_hop, SwitchyardHeadersExt, X_FORWARDED_FOR, X_FORWARDED_HOST, X_FORWARDED_PROTO,
    X_SWITCHYARD_TARGET,
};
use super::response_ext::ResponseExt;
use crate::config::Application;
use crate::metrics;
use crate::request::RequestView;
use http_body_util::combinators::BoxBody;
use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, HOST};
use hyper::{Request, Response, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// JSON error response, `{"error": "<message>"}`.
pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

/// Forward a request to an application with its body streamed through.
///
/// Path and query are appended to the application's base URL. Hop-by-hop
/// headers are dropped and the usual `x-forwarded-*` headers added. Upstream
/// failures become a 502.
pub async fn forward_to_application<B>(
    upstream: &dyn Upstream,
    timeout: Duration,
    app: &Application,
    view: &RequestView,
    req: Request<B>,
) -> Response<BoxBody<Bytes, hyper::Error>>
where
    B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
{
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let full_uri = format!("{}{}", app.base_url(), path_and_query);

    debug!(application = %app.name, upstream = %full_uri, "forwarding request");

    let mut builder = Request::builder().method(parts.method).uri(&full_uri);
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in parts.headers.iter() {
            if name == HOST || is_hop_by_hop(name.as_str()) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        if let Some(ip) = view.client_ip {
            let forwarded = match view.header(X_FORWARDED_FOR.as_str()) {
                Some(existing) => format!("{existing}, {ip}"),
                None => ip.to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                headers.insert(X_FORWARDED_FOR.clone(), value);
            }
        }
        if let Some(host) = parts.headers.get(HOST) {
            headers.insert(X_FORWARDED_HOST.clone(), host.clone());
        }
        if let Ok(proto) = HeaderValue::from_str(&view.scheme) {
            headers.insert(X_FORWARDED_PROTO.clone(), proto);
        }
    }

    let upstream_req = match builder.body(BoxBody::new(body)) {
        Ok(req) => req,
        Err(e) => {
            error!("Failed to build request for application '{}': {}", app.name, e);
            return error_response(StatusCode::BAD_GATEWAY, "Bad Gateway").into_boxed();
        }
    };

    let start = Instant::now();
    let result = tokio::time::timeout(timeout, upstream.send(upstream_req)).await;
    metrics::record_upstream_duration(&app.name, start.elapsed().as_secs_f64() * 1000.0);

    match result {
        Ok(Ok(response)) => {
            let (mut parts, body) = response.into_parts();
            let hop: Vec<_> = parts
                .headers
                .keys()
                .filter(|name| is_hop_by_hop(name.as_str()))
                .cloned()
                .collect();
            for name in hop {
                parts.headers.remove(name);
            }
            parts.set_header_value(&X_SWITCHYARD_TARGET, &app.name);
            Response::from_parts(parts, body)
        }
        Ok(Err(e)) => {
            error!("Failed to forward request to application '{}': {}", app.name, e);
            error_response(StatusCode::BAD_GATEWAY, "Bad Gateway").into_boxed()
        }
        Err(_) => {
            error!(
                "Request to application '{}' timed out after {:?}",
                app.name, timeout
            );
            error_response(StatusCode::BAD_GATEWAY, "Upstream timed out").into_boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::proxy::response_ext::{empty_body, full_body};
    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use parking_lot::Mutex;

    struct EchoUpstream {
        seen: Mutex<Option<Request<()>>>,
        fail: bool,
    }

    #[async_trait]
    impl Upstream for EchoUpstream {
        async fn send(
            &self,
            req: Request<BoxBody<Bytes, hyper::Error>>,
        ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, BoxError> {
            let (parts, _) = req.into_parts();
            *self.seen.lock() = Some(Request::from_parts(parts, ()));
            if self.fail {
                return Err("refused".into());
            }
            Ok(Response::builder()
                .header("transfer-encoding", "chunked")
                .header("x-app", "yes")
                .body(full_body(Bytes::from("hello")))
                .unwrap())
        }
    }

    fn app() -> Application {
        Application {
            name: "main-site".to_string(),
            url: "http://127.0.0.1:8000/".to_string(),
            tls_skip_verify: false,
        }
    }

    fn inbound() -> (RequestView, Request<BoxBody<Bytes, hyper::Error>>) {
        let req = Request::builder()
            .uri("/shop/cart?id=1")
            .header("host", "switchyard.local")
            .header("connection", "keep-alive")
            .header("cookie", "a=1")
            .body(empty_body())
            .unwrap();
        let view = RequestView::from_request(&req, Some("192.168.1.42".parse().unwrap()));
        (view, req)
    }

    #[test]
    fn test_error_response() {
        let response = error_response(StatusCode::BAD_GATEWAY, "Bad \"Gateway\"");
        assert_eq!(response.status(), 502);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_error_response_body_is_valid_json() {
        let response = error_response(StatusCode::INTERNAL_SERVER_ERROR, "quote \" inside");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "quote \" inside");
    }

    #[tokio::test]
    async fn test_forward_rewrites_uri_and_headers() {
        let upstream = EchoUpstream {
            seen: Mutex::new(None),
            fail: false,
        };
        let (view, req) = inbound();
        let response =
            forward_to_application(&upstream, Duration::from_secs(5), &app(), &view, req).await;

        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["x-switchyard-target"], "main-site");
        assert_eq!(response.headers()["x-app"], "yes");
        assert!(response.headers().get("transfer-encoding").is_none());

        let seen = upstream.seen.lock().take().unwrap();
        assert_eq!(seen.uri(), "http://127.0.0.1:8000/shop/cart?id=1");
        assert_eq!(seen.headers()["cookie"], "a=1");
        assert_eq!(seen.headers()["x-forwarded-for"], "192.168.1.42");
        assert_eq!(seen.headers()["x-forwarded-host"], "switchyard.local");
        assert_eq!(seen.headers()["x-forwarded-proto"], "http");
        assert!(seen.headers().get("connection").is_none());
        assert!(seen.headers().get("host").is_none());
    }

    #[tokio::test]
    async fn test_forward_failure_is_502() {
        let upstream = EchoUpstream {
            seen: Mutex::new(None),
            fail: true,
        };
        let (view, req) = inbound();
        let response =
            forward_to_application(&upstream, Duration::from_secs(5), &app(), &view, req).await;
        assert_eq!(response.status(), 502);
        assert!(response.headers().get("x-switchyard-target").is_none());
    }
}
