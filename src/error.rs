use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid {name} upstream '{url}': {reason}")]
    InvalidUpstream {
        name: String,
        url: String,
        reason: String,
    },

    #[error("{reason}")]
    Upstream {
        name: String,
        url: String,
        reason: String,
    },

    #[error("no response within {secs}s")]
    UpstreamTimeout {
        name: String,
        url: String,
        secs: u64,
    },

    #[error("Local server not configured to proxy {0}. Please run with the \"--{0}-proxy-url\" flag")]
    UpstreamNotConfigured(String),

    #[error("Redirect table error: {0}")]
    Redirects(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<hyper::http::Error> for ServerError {
    fn from(e: hyper::http::Error) -> Self {
        ServerError::Http(e.to_string())
    }
}
