//! HTTP adapter serving [`ReviewApi`] with axum.
//!
//! The server runs a tokio runtime on its own thread so the rest of the
//! program stays synchronous. Handlers hop onto the blocking pool because
//! every operation does file I/O under the store lock.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread::JoinHandle;

use axum::async_trait;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::oneshot;

use super::api::{ApiError, PreferFolderRequest, ReviewApi, ToggleKeepRequest};

/// Errors starting the review server.
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("Failed to bind review server on {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The async runtime could not be created.
    #[error("Failed to start review server runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}

/// `Json` whose rejection is an [`ApiError`], so malformed bodies get the
/// same `{ok: false, error}` shape as every other failure.
struct ApiJson<T>(T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::InvalidRequest(rejection.body_text())),
        }
    }
}

type Shared = Arc<ReviewApi>;

/// Path of the active group endpoint.
pub const GROUP_PATH: &str = "/api/group";

/// Run a blocking API call on the blocking pool.
async fn blocking<T, F>(api: Shared, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&ReviewApi) -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&api))
        .await
        .map_err(|e| ApiError::Store(format!("handler panicked: {e}")))?
}

fn json<T: Serialize>(result: Result<T, ApiError>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_group(State(api): State<Shared>) -> Response {
    json(blocking(api, ReviewApi::group_view).await)
}

async fn toggle_keep(
    State(api): State<Shared>,
    ApiJson(req): ApiJson<ToggleKeepRequest>,
) -> Response {
    json(blocking(api, move |api| api.toggle_keep(&req)).await)
}

async fn prefer_folder(
    State(api): State<Shared>,
    ApiJson(req): ApiJson<PreferFolderRequest>,
) -> Response {
    json(blocking(api, move |api| api.prefer_folder(&req)).await)
}

async fn finished(State(api): State<Shared>) -> Response {
    json(blocking(api, ReviewApi::finished).await)
}

async fn reset_finished(State(api): State<Shared>) -> Response {
    json(blocking(api, ReviewApi::reset_finished).await)
}

async fn toggle_auto_finish(State(api): State<Shared>) -> Response {
    json(blocking(api, ReviewApi::toggle_auto_finish).await)
}

async fn serve_file(State(api): State<Shared>, Path(name): Path<String>) -> Response {
    match blocking(api, move |api| api.file(&name)).await {
        Ok(file) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, file.content_type),
                (header::CACHE_CONTROL, "no-store"),
            ],
            Body::from(file.bytes),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Build the review router.
pub fn router(api: Shared) -> Router {
    Router::new()
        .route(GROUP_PATH, get(get_group))
        .route("/api/toggle_keep", post(toggle_keep))
        .route("/api/prefer_folder", post(prefer_folder))
        .route("/api/finished", post(finished))
        .route("/api/reset_finished", post(reset_finished))
        .route("/api/toggle_auto_finish", post(toggle_auto_finish))
        .route("/files/*name", get(serve_file))
        .with_state(api)
}

/// A running review server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the server is listening on.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// URL of the group endpoint, the entry point for a review client.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}{}", self.addr, GROUP_PATH)
    }

    /// Stop the server and wait for its thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Review server thread panicked");
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bind `host:port` and serve the API on a background thread.
///
/// Port 0 picks a free port; see [`ServerHandle::addr`].
///
/// # Errors
///
/// Returns [`ServerError`] when the socket cannot be bound or the runtime
/// cannot be built.
pub fn start(api: Arc<ReviewApi>, host: &str, port: u16) -> Result<ServerHandle, ServerError> {
    let addr_text = format!("{host}:{port}");
    let bind_err = |source| ServerError::Bind {
        addr: addr_text.clone(),
        source,
    };

    let std_listener = TcpListener::bind(addr_text.as_str()).map_err(bind_err)?;
    std_listener.set_nonblocking(true).map_err(bind_err)?;
    let addr = std_listener.local_addr().map_err(bind_err)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .thread_name("review-server")
        .build()
        .map_err(ServerError::Runtime)?;

    let (tx, rx) = oneshot::channel::<()>();
    let app = router(api);

    let thread = std::thread::Builder::new()
        .name("review-server".into())
        .spawn(move || {
            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(std_listener) {
                    Ok(l) => l,
                    Err(e) => {
                        log::error!("Review server listener failed: {}", e);
                        return;
                    }
                };
                let served = axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = rx.await;
                    })
                    .await;
                if let Err(e) = served {
                    log::error!("Review server stopped with error: {}", e);
                }
            });
        })
        .map_err(ServerError::Runtime)?;

    log::info!("Review server listening on http://{}", addr);

    Ok(ServerHandle {
        addr,
        shutdown: Some(tx),
        thread: Some(thread),
    })
}
