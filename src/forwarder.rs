use crate::common::{ProxyBody, ResponseBuilder};
use crate::error::ServerError;
use crate::upstream::{Endpoint, Upstream, UpstreamUrl};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use hyper::{HeaderMap, Method, Request, Response};
use log::{debug, warn};
use std::net::SocketAddr;
use tokio::time::{timeout, Duration};

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// The listener only speaks plaintext HTTP.
const FORWARDED_PROTO: &str = "http";

/// Methods whose request body is sent upstream.
pub fn expects_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT
}

/// An inbound request, already routed, on its way to an upstream.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Path and query as the upstream should see them.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub client_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone)]
pub struct Forwarder {
    timeout_duration: Duration,
}

impl Forwarder {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout_duration: Duration::from_secs(timeout_secs),
        }
    }

    /// Always produces a response; failures become `502`.
    pub async fn forward(&self, upstream: &Upstream, request: ProxyRequest) -> Response<ProxyBody> {
        match self.try_forward(upstream, request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Proxy error ({}): {}", upstream.name(), e);
                ResponseBuilder::bad_gateway(Self::failure_message(upstream, &e))
            }
        }
    }

    async fn try_forward(&self, upstream: &Upstream, request: ProxyRequest) -> Result<Response<ProxyBody>, ServerError> {
        let Endpoint { url, transport } = upstream
            .endpoint()
            .ok_or_else(|| ServerError::UpstreamNotConfigured(upstream.name().to_string()))?;

        debug!("{} {} -> {}", request.method, request.path_and_query, url);
        let outbound = Self::build_request(url, request)?;

        let response = timeout(self.timeout_duration, transport.round_trip(outbound))
            .await
            .map_err(|_| ServerError::UpstreamTimeout {
                name: upstream.name().to_string(),
                url: url.origin(),
                secs: self.timeout_duration.as_secs(),
            })?
            .map_err(|e| ServerError::Upstream {
                name: upstream.name().to_string(),
                url: url.origin(),
                reason: e.to_string(),
            })?;

        Ok(Self::relay_response(response))
    }

    pub fn build_request(url: &UpstreamUrl, request: ProxyRequest) -> Result<Request<Full<Bytes>>, ServerError> {
        let ProxyRequest {
            method,
            path_and_query,
            mut headers,
            body,
            client_addr,
        } = request;

        let original_host = headers.get(HOST).cloned();
        let upstream_host = HeaderValue::from_str(url.authority())
            .map_err(|e| ServerError::Http(format!("Invalid upstream host: {}", e)))?;
        headers.insert(HOST, upstream_host);

        if let Some(addr) = client_addr {
            let client_ip = HeaderValue::from_str(&addr.ip().to_string())
                .map_err(|e| ServerError::Http(e.to_string()))?;
            headers.insert(X_FORWARDED_FOR.clone(), client_ip);
        }
        if let Some(host) = original_host {
            headers.insert(X_FORWARDED_HOST.clone(), host);
        }
        headers.insert(X_FORWARDED_PROTO.clone(), HeaderValue::from_static(FORWARDED_PROTO));

        // The body is re-framed with an exact length, or dropped.
        headers.remove(TRANSFER_ENCODING);
        let body = if expects_body(&method) {
            let body = body.unwrap_or_default();
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
            body
        } else {
            headers.remove(CONTENT_LENGTH);
            Bytes::new()
        };

        let mut outbound = Request::new(Full::new(body));
        *outbound.method_mut() = method;
        *outbound.uri_mut() = url.uri_for(&path_and_query)?;
        *outbound.headers_mut() = headers;
        Ok(outbound)
    }

    /// Status and body pass through; framing headers are dropped so the
    /// listener can frame the body itself.
    pub fn relay_response(mut response: Response<ProxyBody>) -> Response<ProxyBody> {
        let headers = response.headers_mut();
        headers.remove(TRANSFER_ENCODING);
        headers.remove(CONNECTION);
        response
    }

    fn failure_message(upstream: &Upstream, e: &ServerError) -> String {
        match (e, upstream.url()) {
            (ServerError::UpstreamNotConfigured(_), _) => e.to_string(),
            (_, Some(url)) => format!("Something went wrong proxying to {}: {}", url, e),
            (_, None) => format!("Something went wrong proxying {}: {}", upstream.name(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::full;
    use crate::upstream::UpstreamName;
    use hyper::StatusCode;

    fn portal_url() -> UpstreamUrl {
        UpstreamUrl::parse(UpstreamName::Portal, "http://portal.internal:3000").unwrap()
    }

    fn inbound(method: Method, body: Option<&'static str>) -> ProxyRequest {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("localhost:8000"));
        headers.insert("cookie", HeaderValue::from_static("session=abc"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("5"));
        ProxyRequest {
            method,
            path_and_query: "/_api/authenticate?next=%2F".to_string(),
            headers,
            body: body.map(|b| Bytes::from_static(b.as_bytes())),
            client_addr: Some("192.168.1.20:51000".parse().unwrap()),
        }
    }

    #[test]
    fn test_rewrites_host_and_adds_forwarded_headers() {
        let request = Forwarder::build_request(&portal_url(), inbound(Method::GET, None)).unwrap();

        assert_eq!(request.uri().to_string(), "http://portal.internal:3000/_api/authenticate?next=%2F");
        assert_eq!(request.headers()[HOST], "portal.internal:3000");
        assert_eq!(request.headers()["x-forwarded-host"], "localhost:8000");
        assert_eq!(request.headers()["x-forwarded-for"], "192.168.1.20");
        assert_eq!(request.headers()["x-forwarded-proto"], "http");
        assert_eq!(request.headers()["cookie"], "session=abc");
    }

    #[test]
    fn test_body_only_for_post_and_put() {
        let post = Forwarder::build_request(&portal_url(), inbound(Method::POST, Some("a=1&b"))).unwrap();
        assert_eq!(post.headers()[CONTENT_LENGTH], "5");

        let put = Forwarder::build_request(&portal_url(), inbound(Method::PUT, None)).unwrap();
        assert_eq!(put.headers()[CONTENT_LENGTH], "0");

        let delete = Forwarder::build_request(&portal_url(), inbound(Method::DELETE, Some("ignored"))).unwrap();
        assert!(delete.headers().get(CONTENT_LENGTH).is_none());
    }

    #[test]
    fn test_relay_strips_framing_headers() {
        let response = Response::builder()
            .status(StatusCode::CREATED)
            .header("transfer-encoding", "chunked")
            .header("connection", "close")
            .header("set-cookie", "session=xyz")
            .body(full("ok"))
            .unwrap();

        let relayed = Forwarder::relay_response(response);
        assert_eq!(relayed.status(), StatusCode::CREATED);
        assert!(relayed.headers().get(TRANSFER_ENCODING).is_none());
        assert!(relayed.headers().get(CONNECTION).is_none());
        assert_eq!(relayed.headers()["set-cookie"], "session=xyz");
    }

    #[tokio::test]
    async fn test_unconfigured_upstream_is_bad_gateway() {
        let forwarder = Forwarder::new(30);
        let response = forwarder
            .forward(&Upstream::disabled(UpstreamName::Portal), inbound(Method::POST, Some("a=1&b")))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
