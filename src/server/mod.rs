//! HTTP server module
//!
//! hyper HTTP/1 server for the upload API. Each connection runs on its own
//! tokio task; each request is routed by [`RouteParser`]. JSON answers are
//! buffered; stored assets are streamed from their backend.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tubely_uploadr::config::Config;
//! use tubely_uploadr::server::Server;
//! use tubely_uploadr::storage;
//! use tubely_uploadr::store::InMemoryVideoStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("config.yaml")?;
//! let backend = storage::from_config(&config.storage, &config.server.public_url).await?;
//! let server = Server::new(&config, Arc::new(InMemoryVideoStore::new()), backend).await?;
//! println!("Listening on {}", server.local_addr());
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

use crate::auth::jwt::JwtValidator;
use crate::auth::AuthGate;
use crate::config::Config;
use crate::media::AssetKind;
use crate::router::{Route, RouteParser, RouterError};
use crate::storage::StorageBackend;
use crate::store::{NewVideo, StoreError, VideoStore};
use crate::upload::{UploadError, UploadPipeline};
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, Limited, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

/// Largest JSON body accepted by `POST /api/videos`
const MAX_JSON_BODY: usize = 64 * 1024;

/// Response body: buffered for JSON, streamed for assets
pub type ResponseBody = UnsyncBoxBody<Bytes, io::Error>;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Invalid server configuration: {0}")]
    ConfigError(String),
}

/// Shared request-handling state
pub struct AppState {
    auth: AuthGate,
    pipeline: UploadPipeline,
    videos: Arc<dyn VideoStore>,
    storage: Arc<dyn StorageBackend>,
}

impl AppState {
    pub fn new(
        auth: AuthGate,
        videos: Arc<dyn VideoStore>,
        storage: Arc<dyn StorageBackend>,
        config: &Config,
    ) -> Self {
        Self {
            pipeline: UploadPipeline::new(
                auth.clone(),
                videos.clone(),
                storage.clone(),
                config.upload.clone(),
            ),
            auth,
            videos,
            storage,
        }
    }
}

/// HTTP Server
pub struct Server {
    state: Arc<AppState>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Create a server and bind it to `config.server.address`
    ///
    /// Port 0 binds an OS-assigned port; see [`Server::local_addr`].
    pub async fn new(
        config: &Config,
        videos: Arc<dyn VideoStore>,
        storage: Arc<dyn StorageBackend>,
    ) -> Result<Self, ServerError> {
        let validator = JwtValidator::from_config(&config.auth.jwt)
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;
        let auth = AuthGate::new(Arc::new(validator));

        Self::with_state(
            &config.server.address,
            AppState::new(auth, videos, storage, config),
        )
        .await
    }

    /// Bind with a prebuilt state
    pub async fn with_state(address: &str, state: AppState) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!(address = %local_addr, backend = state.storage.name(), "Server bound");

        Ok(Self {
            state: Arc::new(state),
            listener,
            local_addr,
        })
    }

    /// The address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until ctrl-c
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await
    }

    /// Serve until `shutdown` resolves
    ///
    /// In-flight connections keep running on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(address = %self.local_addr, "Server accepting connections");

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { Ok::<_, Infallible>(handle_request(req, state).await) }
                });

                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    error!(peer = %peer_addr, error = %e, "Error serving connection");
                }
            });
        }

        info!("Shutting down server");
        Ok(())
    }
}

/// Route and answer one request
async fn handle_request(req: Request<Incoming>, state: Arc<AppState>) -> Response<ResponseBody> {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match RouteParser::parse(method.as_str(), &path) {
        Ok(route) => dispatch(route, req, &state).await,
        Err(RouterError::NotFound(_)) => json_error(StatusCode::NOT_FOUND, "Not Found", None),
        Err(e @ RouterError::MethodNotAllowed { .. }) => json_error(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method Not Allowed",
            Some(e.to_string()),
        ),
        Err(e @ RouterError::InvalidPath(_)) => {
            json_error(StatusCode::BAD_REQUEST, "Invalid path", Some(e.to_string()))
        }
    };

    info!(
        http.method = %method,
        http.path = %path,
        http.status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Handled request"
    );
    response
}

async fn dispatch(
    route: Route,
    req: Request<Incoming>,
    state: &AppState,
) -> Response<ResponseBody> {
    match route {
        Route::Health => respond(StatusCode::OK, "text/plain", Bytes::from_static(b"ok")),
        Route::UploadThumbnail { video_id } => {
            upload(state, AssetKind::Thumbnail, &video_id, req).await
        }
        Route::UploadVideo { video_id } => upload(state, AssetKind::Video, &video_id, req).await,
        Route::CreateVideo => create_video(state, req).await,
        Route::GetVideo { video_id } => get_video(state, &video_id).await,
        Route::Asset { key } => asset(state, &key).await,
    }
}

async fn upload(
    state: &AppState,
    kind: AssetKind,
    video_id: &str,
    req: Request<Incoming>,
) -> Response<ResponseBody> {
    let (parts, body) = req.into_parts();
    match state
        .pipeline
        .upload(kind, video_id, &parts.headers, body.into_data_stream())
        .await
    {
        Ok(video) => json(StatusCode::OK, &video),
        Err(e) => upload_error(&e),
    }
}

async fn create_video(state: &AppState, req: Request<Incoming>) -> Response<ResponseBody> {
    let (parts, body) = req.into_parts();
    let user_id = match authenticate(state, &parts.headers).await {
        Ok(id) => id,
        Err(response) => return response,
    };

    let bytes = match Limited::new(body, MAX_JSON_BODY).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                "Couldn't read body",
                Some(e.to_string()),
            )
        }
    };
    let params: NewVideo = match serde_json::from_slice(&bytes) {
        Ok(params) => params,
        Err(e) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                "Couldn't decode parameters",
                Some(e.to_string()),
            )
        }
    };

    match state.videos.create_video(user_id, params).await {
        Ok(video) => json(StatusCode::CREATED, &video),
        Err(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Couldn't create video",
            Some(e.to_string()),
        ),
    }
}

async fn get_video(state: &AppState, video_id: &str) -> Response<ResponseBody> {
    let Ok(id) = Uuid::parse_str(video_id) else {
        return json_error(StatusCode::BAD_REQUEST, "Invalid ID", None);
    };

    match state.videos.get_video(id).await {
        Ok(video) => json(StatusCode::OK, &video),
        Err(e @ StoreError::NotFound(_)) => {
            json_error(StatusCode::NOT_FOUND, "Couldn't get video", Some(e.to_string()))
        }
        Err(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Couldn't get video",
            Some(e.to_string()),
        ),
    }
}

async fn asset(state: &AppState, key: &str) -> Response<ResponseBody> {
    match state.storage.fetch(key).await {
        Ok(Some(found)) => {
            let content_type = HeaderValue::from_str(&found.content_type)
                .unwrap_or(HeaderValue::from_static("application/octet-stream"));
            let body = StreamBody::new(found.body.map_ok(Frame::data)).boxed_unsync();

            let mut response = Response::new(body);
            let headers = response.headers_mut();
            headers.insert(CONTENT_TYPE, content_type);
            headers.insert(CONTENT_LENGTH, HeaderValue::from(found.content_length));
            response
        }
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Not Found", None),
        Err(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Couldn't read asset",
            Some(e.to_string()),
        ),
    }
}

async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Uuid, Response<ResponseBody>> {
    state
        .auth
        .authenticate(headers)
        .await
        .map_err(|e| upload_error(&UploadError::Auth(e)))
}

fn upload_error(err: &UploadError) -> Response<ResponseBody> {
    json_error(err.status_code(), err.message(), Some(err.to_string()))
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cause: Option<String>,
}

fn json_error(status: StatusCode, message: &str, cause: Option<String>) -> Response<ResponseBody> {
    json(
        status,
        &ErrorBody {
            error: message,
            cause,
        },
    )
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<ResponseBody> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", Bytes::from(body)),
        Err(e) => {
            error!(error = %e, "Failed to encode response");
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                Bytes::from_static(b"Internal Server Error"),
            )
        }
    }
}

fn respond(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<ResponseBody> {
    let body = Full::new(body).map_err(|never| match never {}).boxed_unsync();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, JwtConfig, MetricsConfig, ServerConfig, StorageConfig};
    use crate::storage::InMemoryStore;
    use crate::store::InMemoryVideoStore;

    fn test_config(address: &str) -> Config {
        Config {
            server: ServerConfig {
                address: address.into(),
                public_url: "http://localhost:8091".into(),
            },
            auth: AuthConfig {
                jwt: JwtConfig {
                    secret: "test-secret".into(),
                    algorithm: "HS256".into(),
                    issuer: None,
                },
            },
            storage: StorageConfig::memory(),
            upload: Default::default(),
            metrics: MetricsConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_server_binds_port_zero() {
        let server = Server::new(
            &test_config("127.0.0.1:0"),
            Arc::new(InMemoryVideoStore::new()),
            Arc::new(InMemoryStore::default()),
        )
        .await
        .unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_server_invalid_address() {
        let result = Server::new(
            &test_config("invalid"),
            Arc::new(InMemoryVideoStore::new()),
            Arc::new(InMemoryStore::default()),
        )
        .await;
        assert!(matches!(result, Err(ServerError::BindError(_))));
    }

    #[test]
    fn test_json_error_omits_empty_cause() {
        let response = json_error(StatusCode::NOT_FOUND, "Not Found", None);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_json_error_body() {
        let response = json_error(
            StatusCode::BAD_REQUEST,
            "Invalid ID",
            Some("invalid video id 'x'".into()),
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Invalid ID");
        assert_eq!(value["cause"], "invalid video id 'x'");
    }
}
