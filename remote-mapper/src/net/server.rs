// Copyright 2020 Kodebox, Inc.
// This file is part of CodeChain.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use crate::error::{Result, StorageError};
use crate::mapper::{MapperId, Repository};
use crate::net;
use crate::net::invoker::Invoker;
use crate::net::session::{
    ClientInfo, InvalidationRegistry, SessionEntry, SessionReaper, SessionRegistry,
};
use crate::proto::{self, Operation, RemoteResult, Reply};
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    /// Listen address; port 0 binds an ephemeral port.
    pub bind: String,
    /// Dispatch path.
    pub path: String,
    /// Sessions idle longer than this are garbage collected.
    pub idle_timeout_ms: u64,
    /// How often the reaper sweeps the session registry.
    pub sweep_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "127.0.0.1:8180".to_owned(),
            path: "/mapper".to_owned(),
            idle_timeout_ms: 600_000,
            sweep_interval_ms: 60_000,
        }
    }
}

#[derive(Deserialize, Debug)]
struct CallParams {
    repository: Option<String>,
    mapper: Option<String>,
    queue: Option<String>,
}

struct ServerState {
    repositories: HashMap<String, Arc<dyn Repository>>,
    registry: Arc<SessionRegistry>,
    queues: InvalidationRegistry,
}

/// Standalone host for the mapper dispatch endpoint.
///
/// Requests for different sessions run fully in parallel; requests for the
/// same session are serialized by that session's invoker thread.
pub struct NetServer {
    addr: SocketAddr,
    path: String,
    registry: Arc<SessionRegistry>,
    reaper: Option<SessionReaper>,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl NetServer {
    /// Binds the listener and serves the dispatch endpoint on a dedicated
    /// thread until [`NetServer::stop`].
    pub fn start(config: ServerConfig, repositories: Vec<Arc<dyn Repository>>) -> Result<NetServer> {
        let listener = std::net::TcpListener::bind(&config.bind)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let registry = Arc::new(SessionRegistry::new());
        let state = Arc::new(ServerState {
            repositories: repositories
                .into_iter()
                .map(|repository| (repository.name().to_owned(), repository))
                .collect(),
            registry: registry.clone(),
            queues: InvalidationRegistry::default(),
        });
        let app = Router::new()
            .route(&config.path, post(handle_call))
            .with_state(state);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("mapper-server")
            .enable_all()
            .build()?;
        let (shutdown, shutdown_recv) = tokio::sync::oneshot::channel::<()>();
        let thread = thread::Builder::new()
            .name("mapper-server-main".to_owned())
            .spawn(move || {
                let served = runtime.block_on(async move {
                    let listener = tokio::net::TcpListener::from_std(listener)?;
                    axum::serve(
                        listener,
                        app.into_make_service_with_connect_info::<SocketAddr>(),
                    )
                    .with_graceful_shutdown(async {
                        shutdown_recv.await.ok();
                    })
                    .await
                });
                if let Err(e) = served {
                    log::error!("mapper server terminated: {}", e);
                }
            })?;

        let reaper = SessionReaper::start(
            registry.clone(),
            Duration::from_millis(config.idle_timeout_ms),
            Duration::from_millis(config.sweep_interval_ms),
        )?;

        log::info!("mapper server listening on http://{}{}", addr, config.path);
        Ok(NetServer {
            addr,
            path: config.path,
            registry,
            reaper: Some(reaper),
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Full endpoint URL for clients.
    pub fn endpoint_url(&self) -> String {
        format!("http://{}{}", self.addr, self.path)
    }

    /// Observability snapshot of the live sessions.
    pub fn sessions(&self) -> Vec<(String, ClientInfo)> {
        self.registry.snapshot()
    }

    /// Stops accepting requests, then closes every live session.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.send(()).ok();
        }
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap();
        }
        if let Some(mut reaper) = self.reaper.take() {
            reaper.stop();
        }
        self.registry.close_all();
    }
}

impl Drop for NetServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_call(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(params): Query<CallParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user = headers
        .get(net::REMOTE_USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let outcome =
        tokio::task::spawn_blocking(move || dispatch_envelope(&state, peer, user, params, &body))
            .await;
    match outcome {
        Ok(Ok(reply)) => (
            [(header::CONTENT_TYPE, net::CONTENT_TYPE_OCTET_STREAM)],
            reply,
        )
            .into_response(),
        Ok(Err(error)) => {
            log::warn!("mapper dispatch failed: {}", error);
            (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
        }
        Err(join_error) => {
            log::error!("mapper dispatch worker died: {}", join_error);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "mapper dispatch worker died".to_owned(),
            )
                .into_response()
        }
    }
}

/// Executes one envelope against its session, returning the serialized
/// single result. Any error returned here becomes an HTTP 500.
fn dispatch_envelope(
    state: &ServerState,
    peer: SocketAddr,
    user: Option<String>,
    params: CallParams,
    body: &[u8],
) -> Result<Vec<u8>> {
    let operations = proto::read_envelope(body)?;
    if let Some(queue_id) = params.queue.as_deref() {
        state.queues.ensure(queue_id);
    }

    let (session_id, entry) = resolve_session(state, peer, user, &params)?;

    let mut result: RemoteResult = Ok(Reply::Unit);
    let mut close_requested = false;
    for operation in operations {
        if let Operation::Close = operation {
            close_requested = true;
        }
        let response = apply(state, &session_id, &entry, params.queue.as_deref(), operation);
        let failed = response.is_err();
        result = response;
        if failed {
            break;
        }
    }

    if close_requested {
        state.registry.remove(&session_id);
        entry.invoker.close();
        log::info!("closed mapper session {}", session_id);
    }

    bincode::serialize(&result)
        .map_err(|e| StorageError::Protocol(format!("cannot encode reply: {}", e)))
}

/// Routes to the session named by the request, or mints a new one when no
/// session id is presented. A stale id is an error, never a fresh session.
fn resolve_session(
    state: &ServerState,
    peer: SocketAddr,
    user: Option<String>,
    params: &CallParams,
) -> Result<(String, Arc<SessionEntry>)> {
    // An empty mapper parameter means "no session yet".
    let presented = params.mapper.as_deref().filter(|id| !id.is_empty());
    match presented {
        Some(session_id) => {
            let entry = state
                .registry
                .touch(session_id)
                .ok_or_else(|| StorageError::UnknownSession(session_id.to_owned()))?;
            Ok((session_id.to_owned(), entry))
        }
        None => {
            let repository_name = params.repository.as_deref().unwrap_or_default();
            let repository = state
                .repositories
                .get(repository_name)
                .ok_or_else(|| {
                    StorageError::Storage(format!("no such repository: {}", repository_name))
                })?;
            let invoker = Invoker::open(repository.clone())?;
            let identification = match invoker.call(Operation::Identification) {
                Ok(Reply::Identification(mapper_id)) => mapper_id,
                Ok(other) => {
                    invoker.close();
                    return Err(StorageError::Protocol(format!(
                        "unexpected identification reply: {:?}",
                        other
                    )));
                }
                Err(failure) => {
                    invoker.close();
                    return Err(failure.into());
                }
            };
            let (session_id, entry) =
                state
                    .registry
                    .register(&identification.0, invoker, ClientInfo::new(Some(peer), user));
            entry.touch();
            log::info!(
                "new mapper session {} for repository {} from {}",
                session_id,
                repository_name,
                peer
            );
            Ok((session_id, entry))
        }
    }
}

fn apply(
    state: &ServerState,
    session_id: &str,
    entry: &SessionEntry,
    queue: Option<&str>,
    operation: Operation,
) -> RemoteResult {
    match operation {
        // Invalidation traffic from queue-aware clients is answered from the
        // shared queues, not the backing mapper.
        Operation::SendInvalidations { invalidations } => match queue {
            Some(queue_id) => {
                state.queues.publish(queue_id, &invalidations);
                Ok(Reply::Unit)
            }
            None => entry
                .invoker
                .call(Operation::SendInvalidations { invalidations }),
        },
        Operation::ReceiveInvalidations => match queue {
            Some(queue_id) => Ok(Reply::Invalidations(state.queues.drain(queue_id))),
            None => entry.invoker.call(Operation::ReceiveInvalidations),
        },
        // The client routes by session id, so identification must name it.
        Operation::Identification => entry
            .invoker
            .call(Operation::Identification)
            .map(|_| Reply::Identification(MapperId(session_id.to_owned()))),
        operation => entry.invoker.call(operation),
    }
}
