//! Upstream services reachable through the proxy routes.
//!
//! An [`Upstream`] is either disabled (no URL configured) or an endpoint
//! paired with a [`Transport`] picked once from the URL scheme.

use crate::common::{relay, BoxError, ProxyBody};
use crate::error::ServerError;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, Response, Uri};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::{Connect, HttpConnector};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::fmt;
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamName {
    Search,
    Portal,
}

impl UpstreamName {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamName::Search => "search",
            UpstreamName::Portal => "portal",
        }
    }

    /// Command-line flag that configures this upstream.
    pub fn flag(&self) -> String {
        format!("--{}-proxy-url", self.as_str())
    }
}

impl fmt::Display for UpstreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// `scheme://host[:port]` of an upstream. Any path in the configured URL is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamUrl {
    scheme: Scheme,
    authority: String,
}

impl UpstreamUrl {
    pub fn parse(name: UpstreamName, raw: &str) -> Result<Self, ServerError> {
        let invalid = |reason: String| ServerError::InvalidUpstream {
            name: name.to_string(),
            url: raw.to_string(),
            reason,
        };
        let scheme_hint = || {
            format!(
                "Must include scheme in {} (e.g. https://example.com, rather than example.com)",
                name.flag()
            )
        };

        let url = Url::parse(raw.trim()).map_err(|e| match e {
            url::ParseError::RelativeUrlWithoutBase => invalid(scheme_hint()),
            other => invalid(other.to_string()),
        })?;

        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(invalid(format!(
                    "unsupported scheme '{}'. {}",
                    other,
                    scheme_hint()
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing host".to_string()))?;

        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self { scheme, authority })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.authority)
    }

    pub fn uri_for(&self, path_and_query: &str) -> Result<Uri, ServerError> {
        format!("{}{}", self.origin(), path_and_query)
            .parse::<Uri>()
            .map_err(|e| ServerError::Http(format!("Invalid upstream URI: {}", e)))
    }
}

impl fmt::Display for UpstreamUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.authority)
    }
}

/// One HTTP round trip to an upstream.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, request: Request<Full<Bytes>>) -> Result<Response<ProxyBody>, BoxError>;
}

/// hyper client transport, plaintext or TLS depending on the connector
pub struct HyperTransport<C> {
    client: Client<C, Full<Bytes>>,
}

pub type PlainTransport = HyperTransport<HttpConnector>;
pub type TlsTransport = HyperTransport<HttpsConnector<HttpConnector>>;

impl HyperTransport<HttpConnector> {
    pub fn plain() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

impl HyperTransport<HttpsConnector<HttpConnector>> {
    pub fn tls() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(HttpsConnector::new()),
        }
    }
}

#[async_trait]
impl<C> Transport for HyperTransport<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    async fn round_trip(&self, request: Request<Full<Bytes>>) -> Result<Response<ProxyBody>, BoxError> {
        let response = self.client.request(request).await?;
        Ok(response.map(relay))
    }
}

pub fn transport_for(scheme: Scheme) -> Arc<dyn Transport> {
    match scheme {
        Scheme::Http => Arc::new(PlainTransport::plain()),
        Scheme::Https => Arc::new(TlsTransport::tls()),
    }
}

#[derive(Clone)]
pub struct Endpoint {
    pub url: UpstreamUrl,
    pub transport: Arc<dyn Transport>,
}

#[derive(Clone)]
pub struct Upstream {
    name: UpstreamName,
    endpoint: Option<Endpoint>,
}

impl Upstream {
    pub fn disabled(name: UpstreamName) -> Self {
        Self { name, endpoint: None }
    }

    /// `None` or an empty string disables the upstream; a malformed URL is an error.
    pub fn from_url(name: UpstreamName, raw: Option<&str>) -> Result<Self, ServerError> {
        match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
            None => Ok(Self::disabled(name)),
            Some(raw) => {
                let url = UpstreamUrl::parse(name, raw)?;
                let transport = transport_for(url.scheme());
                Ok(Self::with_transport(name, url, transport))
            }
        }
    }

    pub fn with_transport(name: UpstreamName, url: UpstreamUrl, transport: Arc<dyn Transport>) -> Self {
        Self {
            name,
            endpoint: Some(Endpoint { url, transport }),
        }
    }

    pub fn name(&self) -> UpstreamName {
        self.name
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn url(&self) -> Option<&UpstreamUrl> {
        self.endpoint.as_ref().map(|endpoint| &endpoint.url)
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }
}

impl fmt::Debug for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upstream")
            .field("name", &self.name)
            .field("url", &self.url())
            .finish()
    }
}
