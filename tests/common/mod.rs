//! Shared helpers for integration tests
#![allow(dead_code)]

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::HeaderMap;
use jsonwebtoken::{encode, EncodingKey, Header};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tubely_uploadr::auth::jwt::{Claims, JwtValidator};
use tubely_uploadr::auth::AuthGate;
use tubely_uploadr::config::{
    AuthConfig, Config, JwtConfig, MetricsConfig, ServerConfig, StorageConfig, UploadConfig,
};
use tubely_uploadr::storage::StorageBackend;
use tubely_uploadr::store::{InMemoryVideoStore, NewVideo, Video, VideoStore};
use tubely_uploadr::{Server, UploadPipeline};
use uuid::Uuid;

pub const SECRET: &str = "tubely-integration-secret";
pub const BOUNDARY: &str = "----tubely-test-boundary";

// ========================================================================
// Tokens
// ========================================================================

pub fn token_with(sub: &str, exp_offset: chrono::Duration, secret: &str) -> String {
    let now = chrono::Utc::now();
    let claims = Claims {
        sub: sub.to_string(),
        exp: (now + exp_offset).timestamp() as usize,
        iat: Some(now.timestamp() as usize),
        iss: Some("tubely-access".to_string()),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

pub fn token_for(user: Uuid) -> String {
    token_with(&user.to_string(), chrono::Duration::hours(1), SECRET)
}

// ========================================================================
// Requests
// ========================================================================

pub fn upload_headers(token: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
    }
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(&format!("multipart/form-data; boundary={}", BOUNDARY)).unwrap(),
    );
    headers
}

/// Opening boundary and part headers for a single file field
pub fn part_head(field: &str, content_type: Option<&str>) -> Vec<u8> {
    let mut head = format!(
        "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}.bin\"\r\n",
        BOUNDARY, field, field
    );
    if let Some(ct) = content_type {
        head.push_str(&format!("Content-Type: {}\r\n", ct));
    }
    head.push_str("\r\n");
    head.into_bytes()
}

pub fn part_tail() -> Vec<u8> {
    format!("\r\n--{}--\r\n", BOUNDARY).into_bytes()
}

/// A complete single-field multipart body
pub fn multipart_body(field: &str, content_type: Option<&str>, payload: &[u8]) -> Vec<u8> {
    let mut body = part_head(field, content_type);
    body.extend_from_slice(payload);
    body.extend_from_slice(&part_tail());
    body
}

pub fn one_chunk(body: Vec<u8>) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static {
    stream::iter(vec![Ok(Bytes::from(body))])
}

/// Multipart body whose payload arrives as `chunks` chunks of `chunk_size` bytes
pub fn chunked_body(
    field: &str,
    content_type: &str,
    chunk_size: usize,
    chunks: usize,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static {
    let chunk = Bytes::from(vec![0xA5u8; chunk_size]);
    let mut parts = vec![Ok(Bytes::from(part_head(field, Some(content_type))))];
    parts.extend((0..chunks).map(|_| Ok(chunk.clone())));
    parts.push(Ok(Bytes::from(part_tail())));
    stream::iter(parts)
}

/// Deliver `body` one chunk per poll, the way a socket does
///
/// The multipart parser only sees what has arrived, so size caps and read
/// errors surface while a backend is already consuming the field.
pub fn trickled<S>(body: S) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
{
    body.then(|chunk| async move {
        tokio::task::yield_now().await;
        chunk
    })
}

/// File part that breaks off after `chunks` chunks, as on a client disconnect
pub fn interrupted_body(
    field: &str,
    content_type: &str,
    chunk_size: usize,
    chunks: usize,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static {
    let chunk = Bytes::from(vec![0x5Au8; chunk_size]);
    let mut parts = vec![Ok(Bytes::from(part_head(field, Some(content_type))))];
    parts.extend((0..chunks).map(|_| Ok(chunk.clone())));
    parts.push(Err(io::Error::new(
        io::ErrorKind::ConnectionReset,
        "connection reset by peer",
    )));
    trickled(stream::iter(parts))
}

/// Fake PNG payload of `len` bytes
pub fn png_bytes(len: usize) -> Vec<u8> {
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.extend((0..len.saturating_sub(8)).map(|i| (i % 251) as u8));
    data
}

// ========================================================================
// Wiring
// ========================================================================

pub fn test_config(storage: StorageConfig) -> Config {
    Config {
        server: ServerConfig {
            address: "127.0.0.1:0".into(),
            public_url: "http://localhost:8091".into(),
        },
        auth: AuthConfig {
            jwt: JwtConfig {
                secret: SECRET.into(),
                algorithm: "HS256".into(),
                issuer: None,
            },
        },
        storage,
        upload: UploadConfig::default(),
        metrics: MetricsConfig::default(),
    }
}

pub fn pipeline(
    videos: Arc<InMemoryVideoStore>,
    storage: Arc<dyn StorageBackend>,
) -> UploadPipeline {
    pipeline_with_limits(videos, storage, UploadConfig::default())
}

pub fn pipeline_with_limits(
    videos: Arc<InMemoryVideoStore>,
    storage: Arc<dyn StorageBackend>,
    limits: UploadConfig,
) -> UploadPipeline {
    UploadPipeline::new(
        AuthGate::new(Arc::new(JwtValidator::new_hs256(SECRET))),
        videos,
        storage,
        limits,
    )
}

pub async fn video_owned_by(videos: &InMemoryVideoStore, owner: Uuid) -> Video {
    videos
        .create_video(
            owner,
            NewVideo {
                title: "Boots: a retrospective".into(),
                description: "Lots of boots".into(),
            },
        )
        .await
        .unwrap()
}

pub struct RunningServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl RunningServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn spawn_server(
    config: &Config,
    videos: Arc<InMemoryVideoStore>,
    storage: Arc<dyn StorageBackend>,
) -> RunningServer {
    let server = Server::new(config, videos, storage).await.unwrap();
    let addr = server.local_addr();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));
    RunningServer {
        addr,
        shutdown: Some(tx),
    }
}
