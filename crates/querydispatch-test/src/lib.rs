//! Helpers for testing the dispatch service.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all
//!    console output is captured by the test runner.
//!
//!  - When using [`QueryBackend`], make sure that the server is held until
//!    all requests to it have been made. If the server is dropped, the ports
//!    remain open and all connections to it will time out. To avoid this,
//!    assign it to a variable: `let backend = QueryBackend::new();`.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::{Value, json};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the
///    `querydispatch` crates and mutes all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("querydispatch=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A test server on an OS-assigned local port.
///
/// This server requires a `tokio` runtime and is supposed to be run in a
/// `tokio::test`. It automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    /// Creates a new test server from the given `axum` router.
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns the base URL pointing to this server.
    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

type Hits = Arc<Mutex<BTreeMap<String, usize>>>;

/// A query backend double that counts how often each endpoint was hit.
///
/// Endpoints are served under both `/api/{endpoint}` and `/api2/{endpoint}`
/// and echo their payload back. A few endpoint names have special behavior:
///
/// - `reject`: responds 200 with the backend's failure envelope
///   (`success: false`),
/// - `500`: responds with an internal server error,
/// - `slow`: stalls for five seconds before answering, to exercise client
///   timeouts.
pub struct QueryBackend {
    server: Server,
    hits: Hits,
}

impl QueryBackend {
    /// Creates and spawns the backend double.
    pub fn new() -> Self {
        let hits = Hits::default();

        let router = Router::new()
            .route("/api/:endpoint", post(handle_query))
            .route("/api2/:endpoint", post(handle_query))
            .with_state(Arc::clone(&hits));

        Self {
            server: Server::with_router(router),
            hits,
        }
    }

    /// Returns the base URL pointing to this backend.
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Number of requests made to the given endpoint so far.
    pub fn hits(&self, endpoint: &str) -> usize {
        self.hits
            .lock()
            .unwrap()
            .get(endpoint)
            .copied()
            .unwrap_or_default()
    }

    /// Total number of requests made to this backend.
    pub fn total_hits(&self) -> usize {
        self.hits.lock().unwrap().values().sum()
    }
}

impl Default for QueryBackend {
    fn default() -> Self {
        Self::new()
    }
}

async fn handle_query(
    Path(endpoint): Path<String>,
    State(hits): State<Hits>,
    Json(payload): Json<Value>,
) -> Response {
    *hits.lock().unwrap().entry(endpoint.clone()).or_default() += 1;

    match endpoint.as_str() {
        "500" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "backend exploded" })),
        )
            .into_response(),
        "reject" => Json(json!({ "success": false, "error": "rejected by backend" }))
            .into_response(),
        "slow" => {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Json(json!({ "endpoint": endpoint })).into_response()
        }
        _ => Json(json!({ "endpoint": endpoint, "echo": payload })).into_response(),
    }
}
