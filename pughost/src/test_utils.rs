#![cfg(any(test, feature = "test-utils"))]

use std::collections::BTreeMap;
use std::io;
use std::net::TcpListener as StdTcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::control::{RouteSpec, ToxicDirective, ToxicKind};

/// A request the fake control API received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
}

impl RecordedRequest {
    pub fn is_toxic(&self) -> bool {
        self.path.ends_with("/toxics")
    }
}

#[derive(Debug, Default)]
struct FakeState {
    proxies: BTreeMap<String, RouteSpec>,
    toxics: BTreeMap<String, Vec<ToxicDirective>>,
    requests: Vec<RecordedRequest>,
    reject_create: Option<StatusCode>,
    reject_kinds: Vec<ToxicKind>,
    version_status: Option<StatusCode>,
}

/// In-process stand-in for the engine's control API on an ephemeral port,
/// served by hyper.
pub struct FakeControlApi {
    url: String,
    state: Arc<Mutex<FakeState>>,
    task: JoinHandle<()>,
}

impl Drop for FakeControlApi {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FakeControlApi {
    pub async fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        let state = Arc::new(Mutex::new(FakeState::default()));

        let task = tokio::spawn(serve(listener, state.clone()));

        Ok(Self { url, state, task })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Answer every `POST /proxies` with `status`.
    pub fn reject_route_creation(&self, status: u16) {
        self.lock().reject_create = Some(status_code(status));
    }

    /// Answer `GET /version` with `status`, as an engine that is up but not
    /// serving yet would.
    pub fn fail_version(&self, status: u16) {
        self.lock().version_status = Some(status_code(status));
    }

    /// Answer toxics of `kind` with 400.
    pub fn reject_toxic(&self, kind: ToxicKind) {
        self.lock().reject_kinds.push(kind);
    }

    /// Pre-populate a route, as a crashed earlier run would leave behind.
    pub fn insert_route(&self, route: RouteSpec) {
        let mut state = self.lock();
        state.toxics.insert(route.name.clone(), Vec::new());
        state.proxies.insert(route.name.clone(), route);
    }

    pub fn routes(&self) -> Vec<RouteSpec> {
        self.lock().proxies.values().cloned().collect()
    }

    pub fn toxics(&self, route: &str) -> Vec<ToxicDirective> {
        self.lock().toxics.get(route).cloned().unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn serve(listener: TcpListener, state: Arc<Mutex<FakeState>>) {
    while let Ok((stream, _)) = listener.accept().await {
        let state = state.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, state.clone()));
            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!("fake control API connection error: {err}");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<Mutex<FakeState>>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();

    let (status, reply) = {
        let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
        respond(&mut state, parts.method.as_str(), parts.uri.path(), &body)
    };

    let mut resp = Response::new(Full::new(Bytes::from(reply)));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Ok(resp)
}

fn respond(state: &mut FakeState, method: &str, path: &str, body: &[u8]) -> (StatusCode, String) {
    state.requests.push(RecordedRequest {
        method: method.to_owned(),
        path: path.to_owned(),
    });

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match (method, segments.as_slice()) {
        ("GET", ["version"]) => match state.version_status {
            Some(status) => (status, error_body("engine starting")),
            None => (StatusCode::OK, "2.11.0".to_owned()),
        },
        ("GET", ["proxies"]) => match serde_json::to_string(&state.proxies) {
            Ok(json) => (StatusCode::OK, json),
            Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, error_body(err)),
        },
        ("POST", ["proxies"]) => {
            if let Some(status) = state.reject_create {
                return (status, error_body("rejected by test"));
            }
            match serde_json::from_slice::<RouteSpec>(body) {
                Ok(route) if state.proxies.contains_key(&route.name) => {
                    (StatusCode::CONFLICT, error_body("proxy already exists"))
                }
                Ok(route) => {
                    let reply = serde_json::to_string(&route).unwrap_or_default();
                    state.toxics.insert(route.name.clone(), Vec::new());
                    state.proxies.insert(route.name.clone(), route);
                    (StatusCode::CREATED, reply)
                }
                Err(err) => (StatusCode::BAD_REQUEST, error_body(err)),
            }
        }
        ("DELETE", ["proxies", name]) => {
            if state.proxies.remove(*name).is_some() {
                state.toxics.remove(*name);
                (StatusCode::NO_CONTENT, String::new())
            } else {
                (StatusCode::NOT_FOUND, error_body("proxy not found"))
            }
        }
        ("POST", ["proxies", name, "toxics"]) => {
            let toxic = match serde_json::from_slice::<ToxicDirective>(body) {
                Ok(toxic) => toxic,
                Err(err) => return (StatusCode::BAD_REQUEST, error_body(err)),
            };
            if state.reject_kinds.contains(&toxic.kind) {
                return (StatusCode::BAD_REQUEST, error_body("toxic rejected by test"));
            }
            let Some(toxics) = state.toxics.get_mut(*name) else {
                return (StatusCode::NOT_FOUND, error_body("proxy not found"));
            };

            let toxic_name = format!("{}_{}", toxic.kind, toxic.stream);
            let stream = toxic.stream;
            toxics.push(toxic);
            (
                StatusCode::OK,
                serde_json::json!({ "name": toxic_name, "stream": stream }).to_string(),
            )
        }
        _ => (StatusCode::NOT_FOUND, error_body("not found")),
    }
}

fn error_body(message: impl ToString) -> String {
    serde_json::json!({ "error": message.to_string() }).to_string()
}

/// URL of a localhost port with nothing listening, so connections are refused.
pub fn unused_local_url() -> io::Result<String> {
    let listener = StdTcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(format!("http://127.0.0.1:{port}"))
}

/// An executable shell script standing in for the engine binary.
pub struct FakeEngine {
    _dir: TempDir,
    path: PathBuf,
}

impl FakeEngine {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Write `script` (a `/bin/sh` body) as an executable in a temp dir.
#[cfg(unix)]
pub fn fake_engine(script: &str) -> io::Result<FakeEngine> {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("toxiproxy-server");
    std::fs::write(&path, format!("#!/bin/sh\n{script}\n"))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;

    Ok(FakeEngine { _dir: dir, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlApi;

    #[tokio::test]
    async fn test_fake_tracks_routes_and_toxics() {
        let fake = FakeControlApi::start().await.unwrap();
        let api = ControlApi::new(fake.url());
        let route = RouteSpec::new("r", "localhost:1", "localhost:2");

        api.create_proxy(&route).await.unwrap();
        assert!(api.create_proxy(&route).await.is_err());
        let name = api
            .add_toxic("r", &ToxicDirective::bandwidth(5))
            .await
            .unwrap();
        assert_eq!(name, "bandwidth_downstream");
        assert_eq!(fake.toxics("r"), vec![ToxicDirective::bandwidth(5)]);

        let listed = api.proxies().await.unwrap();
        assert_eq!(listed.get("r"), Some(&route));

        api.delete_proxy("r").await.unwrap();
        let missing = api.delete_proxy("r").await.unwrap_err();
        assert_eq!(missing.status(), Some(404));
        assert!(fake.routes().is_empty());
    }
}
