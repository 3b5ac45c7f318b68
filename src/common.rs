use bytes::Bytes;
use futures::Stream;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Frame, Incoming};
use hyper::{Response, StatusCode};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File as TokioFile;
use tokio_util::io::ReaderStream;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type shared by every response the server produces: buffered
/// messages, streamed files and relayed upstream bodies.
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

pub fn full(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed_unsync()
}

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

pub fn relay(body: Incoming) -> ProxyBody {
    body.map_err(BoxError::from).boxed_unsync()
}

/// Response builder shortcuts for locally generated messages
pub struct ResponseBuilder;

impl ResponseBuilder {
    pub fn text(status: StatusCode, message: impl Into<String>) -> Response<ProxyBody> {
        let message = message.into();
        let mut response = Response::new(full(message));
        *response.status_mut() = status;
        response.headers_mut().insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    pub fn internal_server_error() -> Response<ProxyBody> {
        Self::text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }

    pub fn bad_gateway(message: impl Into<String>) -> Response<ProxyBody> {
        Self::text(StatusCode::BAD_GATEWAY, message)
    }

    pub fn method_not_allowed(allow: &str) -> Response<ProxyBody> {
        let mut response = Self::text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        if let Ok(value) = hyper::header::HeaderValue::from_str(allow) {
            response.headers_mut().insert(hyper::header::ALLOW, value);
        }
        response
    }
}

/// Streams a file in chunks instead of reading it into memory
pub struct StreamingFileBody {
    stream: ReaderStream<TokioFile>,
    remaining: u64,
}

impl StreamingFileBody {
    pub fn new(file: TokioFile, len: u64) -> Self {
        Self {
            stream: ReaderStream::new(file),
            remaining: len,
        }
    }

    pub fn into_proxy_body(self) -> ProxyBody {
        self.map_err(BoxError::from).boxed_unsync()
    }
}

impl Body for StreamingFileBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match Pin::new(&mut self.stream).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.remaining = self.remaining.saturating_sub(chunk.len() as u64);
                Poll::Ready(Some(Ok(Frame::data(chunk))))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> hyper::body::SizeHint {
        hyper::body::SizeHint::with_exact(self.remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_streaming_body_yields_file_contents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("big.pdf");
        let contents = vec![7u8; 20_000];
        std::fs::write(&path, &contents).unwrap();

        let file = TokioFile::open(&path).await.unwrap();
        let body = StreamingFileBody::new(file, contents.len() as u64);
        assert_eq!(body.size_hint().exact(), Some(20_000));

        let collected = body.into_proxy_body().collect().await.unwrap().to_bytes();
        assert_eq!(collected.as_ref(), contents.as_slice());
    }

    #[tokio::test]
    async fn test_method_not_allowed_sets_allow() {
        let response = ResponseBuilder::method_not_allowed("GET, HEAD");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()["allow"], "GET, HEAD");
    }
}
