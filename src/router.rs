//! Per-request dispatch: redirect, proxy, or static file, first match wins.

use crate::common::{empty, BoxError, ProxyBody, ResponseBuilder};
use crate::config::Config;
use crate::error::ServerError;
use crate::forwarder::{expects_body, Forwarder, ProxyRequest};
use crate::redirects::RedirectTable;
use crate::resolver::{strip_query_and_fragment, PathResolver};
use crate::static_files::StaticFileHandler;
use crate::upstream::{Upstream, UpstreamName};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::header::{HeaderValue, LOCATION};
use hyper::{Method, Request, Response, StatusCode};
use log::{debug, warn};
use std::net::SocketAddr;
use std::path::PathBuf;

const PORTAL_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "OPTIONS"];

/// A path prefix forwarded to one upstream.
#[derive(Debug, PartialEq, Eq)]
pub struct ProxyRoute {
    pub prefix: &'static str,
    pub upstream: UpstreamName,
    pub methods: &'static [&'static str],
    /// Replacement for `prefix` in the upstream path, if any.
    pub rewrite_to: Option<&'static str>,
}

impl ProxyRoute {
    pub fn matches(&self, method: &Method, raw_path: &str) -> bool {
        raw_path.starts_with(self.prefix) && self.methods.contains(&method.as_str())
    }

    pub fn rewrite_path(&self, raw_path: &str) -> String {
        match self.rewrite_to {
            Some(replacement) => format!("{}{}", replacement, &raw_path[self.prefix.len()..]),
            None => raw_path.to_string(),
        }
    }
}

/// Scanned in order after the redirect table.
pub const PROXY_ROUTES: &[ProxyRoute] = &[
    ProxyRoute {
        prefix: "/_search",
        upstream: UpstreamName::Search,
        methods: &["GET"],
        rewrite_to: Some("/search"),
    },
    ProxyRoute {
        prefix: "/_portal",
        upstream: UpstreamName::Portal,
        methods: PORTAL_METHODS,
        rewrite_to: None,
    },
    ProxyRoute {
        prefix: "/_api",
        upstream: UpstreamName::Portal,
        methods: PORTAL_METHODS,
        rewrite_to: None,
    },
];

#[derive(Debug, PartialEq, Eq)]
pub enum ResolvedTarget {
    Redirect {
        location: String,
    },
    Proxy {
        route: &'static ProxyRoute,
        rewritten_path: String,
    },
    /// May not exist; the static layer answers 404 then.
    StaticFile {
        path: PathBuf,
    },
}

/// Immutable routing context shared by every connection.
pub struct Router {
    origin: String,
    redirects: RedirectTable,
    resolver: PathResolver,
    static_files: StaticFileHandler,
    search: Upstream,
    portal: Upstream,
    forwarder: Forwarder,
}

impl Router {
    /// `origin` is the listener's own `http://host:port`, used for redirects.
    pub fn new(origin: impl Into<String>, resolver: PathResolver) -> Self {
        Self {
            origin: origin.into(),
            redirects: RedirectTable::new(),
            resolver,
            static_files: StaticFileHandler::default(),
            search: Upstream::disabled(UpstreamName::Search),
            portal: Upstream::disabled(UpstreamName::Portal),
            forwarder: Forwarder::new(crate::config::DEFAULT_PROXY_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &Config, local_addr: SocketAddr) -> Result<Self, ServerError> {
        let resolver = PathResolver::new(config.root_dir.clone(), config.static_assets_dir());
        let redirects_path = config.redirects_path();
        let error_template = config.error_template_path();

        Ok(Self::new(format!("http://{}", local_addr), resolver)
            .with_redirects(RedirectTable::load(redirects_path.as_deref()))
            .with_static_files(StaticFileHandler::new(error_template.as_deref()))
            .with_upstream(Upstream::from_url(
                UpstreamName::Search,
                config.search_proxy_url.as_deref(),
            )?)
            .with_upstream(Upstream::from_url(
                UpstreamName::Portal,
                config.portal_proxy_url.as_deref(),
            )?)
            .with_forwarder(Forwarder::new(config.proxy_timeout_secs)))
    }

    pub fn with_redirects(mut self, redirects: RedirectTable) -> Self {
        self.redirects = redirects;
        self
    }

    pub fn with_static_files(mut self, static_files: StaticFileHandler) -> Self {
        self.static_files = static_files;
        self
    }

    pub fn with_upstream(mut self, upstream: Upstream) -> Self {
        match upstream.name() {
            UpstreamName::Search => self.search = upstream,
            UpstreamName::Portal => self.portal = upstream,
        }
        self
    }

    pub fn with_forwarder(mut self, forwarder: Forwarder) -> Self {
        self.forwarder = forwarder;
        self
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn upstream(&self, name: UpstreamName) -> &Upstream {
        match name {
            UpstreamName::Search => &self.search,
            UpstreamName::Portal => &self.portal,
        }
    }

    /// Redirects only answer navigation; other methods fall through.
    fn follows_redirects(method: &Method) -> bool {
        *method == Method::GET || *method == Method::HEAD
    }

    pub fn resolve_target(&self, method: &Method, raw_path: &str) -> ResolvedTarget {
        self.route(method, raw_path).unwrap_or_else(|| ResolvedTarget::StaticFile {
            path: self.resolver.resolve(raw_path),
        })
    }

    /// Redirect or proxy target; `None` means the path is static.
    fn route(&self, method: &Method, raw_path: &str) -> Option<ResolvedTarget> {
        if Self::follows_redirects(method) {
            if let Some(target) = self.redirects.get(strip_query_and_fragment(raw_path)) {
                return Some(ResolvedTarget::Redirect {
                    location: format!("{}{}", self.origin, target),
                });
            }
        }

        PROXY_ROUTES
            .iter()
            .find(|route| route.matches(method, raw_path))
            .map(|route| ResolvedTarget::Proxy {
                route,
                rewritten_path: route.rewrite_path(raw_path),
            })
    }

    /// Like [`Router::resolve_target`], with the filesystem probing of static
    /// resolution moved onto the blocking pool.
    async fn resolve_target_blocking(&self, method: &Method, raw_path: &str) -> Result<ResolvedTarget, ServerError> {
        if let Some(target) = self.route(method, raw_path) {
            return Ok(target);
        }

        let resolver = self.resolver.clone();
        let raw_path = raw_path.to_string();
        let path = tokio::task::spawn_blocking(move || resolver.resolve(&raw_path))
            .await
            .map_err(|e| ServerError::Io(std::io::Error::other(e)))?;
        Ok(ResolvedTarget::StaticFile { path })
    }

    pub async fn handle<B>(&self, req: Request<B>, client_addr: Option<SocketAddr>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let raw_path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        let target = match self.resolve_target_blocking(&parts.method, &raw_path).await {
            Ok(target) => target,
            Err(e) => {
                warn!("Cannot resolve {}: {}", raw_path, e);
                return ResponseBuilder::internal_server_error();
            }
        };
        debug!("{} {} => {:?}", parts.method, raw_path, target);

        match target {
            ResolvedTarget::Redirect { location } => Self::redirect_response(&location),
            ResolvedTarget::Proxy { route, rewritten_path } => {
                let body = if expects_body(&parts.method) {
                    match body.collect().await {
                        Ok(collected) => Some(collected.to_bytes()),
                        Err(e) => {
                            let e: BoxError = e.into();
                            warn!("Cannot read request body for {}: {}", raw_path, e);
                            return ResponseBuilder::text(StatusCode::BAD_REQUEST, "Cannot read request body");
                        }
                    }
                } else {
                    None
                };

                let request = ProxyRequest {
                    method: parts.method,
                    path_and_query: rewritten_path,
                    headers: parts.headers,
                    body,
                    client_addr,
                };
                self.forwarder.forward(self.upstream(route.upstream), request).await
            }
            ResolvedTarget::StaticFile { path } => match parts.method {
                Method::GET => self.static_files.serve(&path, false).await,
                Method::HEAD => self.static_files.serve(&path, true).await,
                _ => ResponseBuilder::method_not_allowed("GET, HEAD"),
            },
        }
    }

    fn redirect_response(location: &str) -> Response<ProxyBody> {
        let mut response = Response::new(empty());
        *response.status_mut() = StatusCode::FOUND;
        match HeaderValue::from_str(location) {
            Ok(value) => {
                response.headers_mut().insert(LOCATION, value);
                response
            }
            Err(e) => {
                warn!("Redirect target {:?} is not a valid header: {}", location, e);
                ResponseBuilder::internal_server_error()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn router() -> (TempDir, Router) {
        let temp_dir = TempDir::new().unwrap();
        let resolver = PathResolver::new(temp_dir.path(), temp_dir.path().join("static-assets"));
        let router = Router::new("http://127.0.0.1:8000", resolver).with_redirects(RedirectTable::from_pairs([
            ("/old/code", "/us/code"),
            ("/_api/legacy", "/about"),
        ]));
        (temp_dir, router)
    }

    #[test]
    fn test_redirect_location_uses_listener_origin() {
        let (_tmp, router) = router();
        assert_eq!(
            router.resolve_target(&Method::GET, "/old/code"),
            ResolvedTarget::Redirect {
                location: "http://127.0.0.1:8000/us/code".to_string()
            }
        );
        // Query and fragment are stripped before matching.
        assert_eq!(
            router.resolve_target(&Method::HEAD, "/old/code?ref=nav#top"),
            ResolvedTarget::Redirect {
                location: "http://127.0.0.1:8000/us/code".to_string()
            }
        );
    }

    #[test]
    fn test_redirect_checked_before_proxy_prefixes() {
        let (_tmp, router) = router();
        assert!(matches!(
            router.resolve_target(&Method::GET, "/_api/legacy"),
            ResolvedTarget::Redirect { .. }
        ));
        // A POST is not navigation, so it is proxied instead.
        assert!(matches!(
            router.resolve_target(&Method::POST, "/_api/legacy"),
            ResolvedTarget::Proxy { .. }
        ));
    }

    #[test]
    fn test_search_prefix_rewritten() {
        let (_tmp, router) = router();
        match router.resolve_target(&Method::GET, "/_search?q=x") {
            ResolvedTarget::Proxy { route, rewritten_path } => {
                assert_eq!(route.upstream, UpstreamName::Search);
                assert_eq!(rewritten_path, "/search?q=x");
            }
            other => panic!("expected proxy target, got {:?}", other),
        }
    }

    #[test]
    fn test_search_only_proxies_get() {
        let (tmp, router) = router();
        assert_eq!(
            router.resolve_target(&Method::POST, "/_search"),
            ResolvedTarget::StaticFile {
                path: tmp.path().join("_search.html")
            }
        );
    }

    #[test]
    fn test_portal_paths_preserved_for_all_methods() {
        let (_tmp, router) = router();
        for method in [Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS] {
            for path in ["/_portal/home?tab=1", "/_api/authenticate"] {
                match router.resolve_target(&method, path) {
                    ResolvedTarget::Proxy { route, rewritten_path } => {
                        assert_eq!(route.upstream, UpstreamName::Portal);
                        assert_eq!(rewritten_path, path);
                    }
                    other => panic!("{} {} routed to {:?}", method, path, other),
                }
            }
        }
        assert!(matches!(
            router.resolve_target(&Method::PATCH, "/_api/authenticate"),
            ResolvedTarget::StaticFile { .. }
        ));
    }

    #[test]
    fn test_everything_else_is_static() {
        let (tmp, router) = router();
        assert_eq!(
            router.resolve_target(&Method::GET, "/guide/intro"),
            ResolvedTarget::StaticFile {
                path: tmp.path().join("guide/intro.html")
            }
        );
    }

    #[test]
    fn test_route_table_order() {
        let prefixes: Vec<_> = PROXY_ROUTES.iter().map(|route| route.prefix).collect();
        assert_eq!(prefixes, ["/_search", "/_portal", "/_api"]);
    }
}
