//! Stand-in HTTP server for integration tests.
//!
//! Serves an axum router on `127.0.0.1:0` that records every request and
//! answers with whatever response the test's handler builds.

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub body: String,
}

pub struct TestServer {
    pub base: String,
    pub requests: Arc<Mutex<Vec<Recorded>>>,
}

impl TestServer {
    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

type Handler = Arc<dyn Fn(&Recorded) -> Response + Send + Sync>;

#[derive(Clone)]
struct AppState {
    handler: Handler,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

async fn record(State(state): State<AppState>, method: Method, uri: Uri, body: Bytes) -> Response {
    let request = Recorded {
        method: method.to_string(),
        path: uri.path().to_string(),
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    state.requests.lock().unwrap().push(request.clone());
    (state.handler)(&request)
}

/// Start a server on a random port; every request goes to `handler`.
pub async fn spawn<H>(handler: H) -> TestServer
where
    H: Fn(&Recorded) -> Response + Send + Sync + 'static,
{
    let requests = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new().fallback(record).with_state(AppState {
        handler: Arc::new(handler),
        requests: requests.clone(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://{addr}"),
        requests,
    }
}

/// A complete response with a `Content-Length`.
pub fn http_response(status: StatusCode, content_type: &str, body: &[u8]) -> Response {
    (
        status,
        [(CONTENT_TYPE, content_type.to_string())],
        body.to_vec(),
    )
        .into_response()
}

fn streamed(content_type: &str, chunks: Vec<Result<Bytes, io::Error>>) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .body(Body::from_stream(futures::stream::iter(chunks)))
        .unwrap()
}

/// A chunked body with no `Content-Length`.
pub fn unsized_response(content_type: &str, body: &[u8]) -> Response {
    streamed(content_type, vec![Ok(Bytes::copy_from_slice(body))])
}

/// Declares `declared_len` bytes, sends `sent`, then drops the connection.
pub fn interrupted_response(declared_len: u64, sent: &[u8]) -> Response {
    let mut response = streamed(
        "application/octet-stream",
        vec![
            Ok(Bytes::copy_from_slice(sent)),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "body cut short")),
        ],
    );
    response
        .headers_mut()
        .insert(CONTENT_LENGTH, declared_len.into());
    response
}

/// An SSE completion stream with one `data:` event per payload.
pub fn sse_response(payloads: &[&str]) -> Response {
    let body: String = payloads.iter().map(|p| format!("data: {p}\n\n")).collect();
    unsized_response("text/event-stream", body.as_bytes())
}

pub fn redirect(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}
