use crate::config::Config;
use crate::error::ServerError;
use crate::router::Router;
use crate::upstream::UpstreamName;
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Plaintext HTTP/1.1 listener. Each accepted connection runs on its own
/// task with a shared, read-only [`Router`].
pub struct DevServer {
    listener: TcpListener,
    router: Arc<Router>,
}

impl DevServer {
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        config.validate()?;
        let listener = TcpListener::bind((config.bind.as_str(), config.port))
            .await
            .map_err(|e| ServerError::Config(format!("Cannot bind {}:{}: {}", config.bind, config.port, e)))?;
        let local_addr = listener.local_addr()?;

        let static_assets_dir = config.static_assets_dir();
        if !static_assets_dir.exists() {
            if let Err(e) = std::fs::create_dir_all(&static_assets_dir) {
                warn!("Cannot create static assets directory {}: {}", static_assets_dir.display(), e);
            }
        }

        let router = Router::from_config(config, local_addr)?;
        Ok(Self::from_listener(listener, router))
    }

    /// For callers that bind the socket themselves.
    pub fn from_listener(listener: TcpListener, router: Router) -> Self {
        Self {
            listener,
            router: Arc::new(router),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn log_banner(&self) {
        info!("Visit {} in your web browser to view the library...", self.router.origin());
        info!("*** This server is designed for local use. Do not use in production. ***");
        for name in [UpstreamName::Search, UpstreamName::Portal] {
            match self.router.upstream(name).url() {
                Some(url) => info!("PROXYING: \"/_{}\" to {}", name, url),
                None => debug!("Not proxying \"/_{}\" (no {} given)", name, name.flag()),
            }
        }
    }

    /// Runs until the task is dropped. Connection errors never stop the listener.
    pub async fn run(self) -> Result<(), ServerError> {
        info!("HTTP server listening on: {}", self.router.origin());

        loop {
            let (stream, remote_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                    continue;
                }
            };

            let router = self.router.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                    let router = router.clone();
                    async move {
                        let method = req.method().clone();
                        let path = req.uri().to_string();
                        let response = router.handle(req, Some(remote_addr)).await;
                        info!("{} \"{} {}\" {}", remote_addr.ip(), method, path, response.status().as_u16());
                        Ok::<_, Infallible>(response)
                    }
                });

                if let Err(err) = ServerBuilder::new().serve_connection(io, service).await {
                    if err.is_incomplete_message() {
                        debug!("Connection from {} closed early: {}", remote_addr, err);
                    } else {
                        error!("Error serving HTTP connection from {}: {}", remote_addr, err);
                    }
                }
            });
        }
    }
}
