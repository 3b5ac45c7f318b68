use crate::common::{empty, full, ProxyBody, StreamingFileBody};
use hyper::{Response, StatusCode};
use log::{debug, warn};
use std::io::ErrorKind;
use std::path::Path;

/// Fallback 404 page when the site ships no template
const HTML_404_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Error response</title></head>
<body>
    <h1>Error response</h1>
    <p>Error code: %(code)d</p>
    <p>Message: %(message)s.</p>
    <p>%(explain)s</p>
</body>
</html>"#;

/// Serves already-resolved local files. Knows nothing about URL rules.
#[derive(Clone)]
pub struct StaticFileHandler {
    error_template: String,
}

impl Default for StaticFileHandler {
    fn default() -> Self {
        Self {
            error_template: HTML_404_TEMPLATE.to_string(),
        }
    }
}

impl StaticFileHandler {
    pub fn new(error_template: Option<&Path>) -> Self {
        let Some(path) = error_template else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(template) => {
                debug!("Using error template {}", path.display());
                Self::with_template(template)
            }
            Err(e) => {
                warn!("Cannot read error template {}: {}; using built-in page", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn with_template(template: impl Into<String>) -> Self {
        Self {
            error_template: template.into(),
        }
    }

    pub async fn serve(&self, file_path: &Path, is_head: bool) -> Response<ProxyBody> {
        let metadata = match tokio::fs::metadata(file_path).await {
            Ok(metadata) => metadata,
            Err(e) => return self.io_error_response(file_path, &e),
        };

        if !metadata.is_file() {
            return self.not_found_response();
        }

        let body = if is_head {
            empty()
        } else {
            match tokio::fs::File::open(file_path).await {
                Ok(file) => StreamingFileBody::new(file, metadata.len()).into_proxy_body(),
                Err(e) => return self.io_error_response(file_path, &e),
            }
        };

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", Self::guess_mime_type(file_path))
            .header("Content-Length", metadata.len().to_string());

        if let Ok(modified) = metadata.modified() {
            builder = builder.header("Last-Modified", httpdate::fmt_http_date(modified));
        }

        builder.body(body).unwrap_or_else(|e| {
            warn!("Cannot build response for {}: {}", file_path.display(), e);
            self.not_found_response()
        })
    }

    pub fn not_found_response(&self) -> Response<ProxyBody> {
        self.error_response(
            StatusCode::NOT_FOUND,
            "File not found",
            "Nothing matches the given URI",
        )
    }

    pub fn forbidden_response(&self) -> Response<ProxyBody> {
        self.error_response(
            StatusCode::FORBIDDEN,
            "Forbidden",
            "Request forbidden -- authorization will not help",
        )
    }

    fn io_error_response(&self, file_path: &Path, e: &std::io::Error) -> Response<ProxyBody> {
        debug!("Cannot serve {}: {}", file_path.display(), e);
        match e.kind() {
            ErrorKind::PermissionDenied => self.forbidden_response(),
            _ => self.not_found_response(),
        }
    }

    fn error_response(&self, status: StatusCode, message: &str, explain: &str) -> Response<ProxyBody> {
        let page = render_error_page(&self.error_template, status, message, explain);
        let mut response = Response::new(full(page));
        *response.status_mut() = status;
        response.headers_mut().insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("text/html; charset=utf-8"),
        );
        response
    }

    pub fn guess_mime_type(file_path: &Path) -> String {
        let mime = mime_guess::from_path(file_path).first_or_octet_stream();

        let mime_str = mime.as_ref();
        if mime_str.starts_with("text/") || mime_str == "application/json" || mime_str == "application/xml" {
            format!("{}; charset=utf-8", mime_str)
        } else {
            mime_str.to_string()
        }
    }
}

/// Fills the `%(code)d`, `%(message)s` and `%(explain)s` placeholders.
pub fn render_error_page(template: &str, status: StatusCode, message: &str, explain: &str) -> String {
    template
        .replace("%(code)d", status.as_str())
        .replace("%(message)s", message)
        .replace("%(explain)s", explain)
}
