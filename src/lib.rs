pub mod common;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod logging;
pub mod redirects;
pub mod resolver;
pub mod router;
pub mod server;
pub mod static_files;
pub mod upstream;

pub use config::Config;
pub use error::ServerError;
pub use router::{ResolvedTarget, Router};
pub use server::DevServer;
