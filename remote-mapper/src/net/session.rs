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

use crate::error::Result;
use crate::net::invoker::Invoker;
use crate::row::Invalidations;
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Per-session observability counters. Never used for correctness decisions.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub remote_addr: Option<SocketAddr>,
    pub remote_user: Option<String>,
    pub request_count: u64,
    pub last_request: Instant,
}

impl ClientInfo {
    pub fn new(remote_addr: Option<SocketAddr>, remote_user: Option<String>) -> Self {
        ClientInfo {
            remote_addr,
            remote_user,
            request_count: 0,
            last_request: Instant::now(),
        }
    }
}

pub struct SessionEntry {
    pub invoker: Invoker,
    info: Mutex<ClientInfo>,
}

impl SessionEntry {
    pub(crate) fn touch(&self) {
        let mut info = self.info.lock();
        info.request_count += 1;
        info.last_request = Instant::now();
    }

    pub fn info(&self) -> ClientInfo {
        self.info.lock().clone()
    }

    fn idle_for(&self) -> Duration {
        self.info.lock().last_request.elapsed()
    }
}

/// Live remote sessions, keyed by minted session id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionEntry>>>,
    counter: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            sessions: RwLock::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Registers `invoker` under an id minted from the mapper identification
    /// and a process-wide counter, so concurrent repositories sharing one
    /// server never collide.
    pub fn register(
        &self,
        identification: &str,
        invoker: Invoker,
        info: ClientInfo,
    ) -> (String, Arc<SessionEntry>) {
        let serial = self.counter.fetch_add(1, Ordering::SeqCst);
        let session_id = format!("{}-{}", identification, serial);
        let entry = Arc::new(SessionEntry {
            invoker,
            info: Mutex::new(info),
        });
        self.sessions
            .write()
            .insert(session_id.clone(), entry.clone());
        (session_id, entry)
    }

    /// Looks a session up, bumping its request counters.
    pub fn touch(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        let entry = self.sessions.read().get(session_id).cloned()?;
        entry.touch();
        Some(entry)
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.write().remove(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Observability snapshot of every live session.
    pub fn snapshot(&self) -> Vec<(String, ClientInfo)> {
        self.sessions
            .read()
            .iter()
            .map(|(session_id, entry)| (session_id.clone(), entry.info()))
            .collect()
    }

    /// Evicts and closes sessions idle longer than `idle_timeout`, returning
    /// how many were evicted.
    pub fn sweep(&self, idle_timeout: Duration) -> usize {
        let expired: Vec<(String, Arc<SessionEntry>)> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, entry)| entry.idle_for() > idle_timeout)
            .map(|(session_id, entry)| (session_id.clone(), entry.clone()))
            .collect();
        for (session_id, entry) in &expired {
            self.sessions.write().remove(session_id);
            log::info!("evicting idle mapper session {}", session_id);
            entry.invoker.close();
        }
        expired.len()
    }

    /// Closes every live session. Used at server shutdown.
    pub fn close_all(&self) {
        let drained: Vec<(String, Arc<SessionEntry>)> =
            self.sessions.write().drain().collect();
        for (session_id, entry) in drained {
            log::info!("closing mapper session {}", session_id);
            entry.invoker.close();
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic sweep over the registry: sessions abandoned without a close call
/// are garbage collected once idle past the configured timeout.
pub struct SessionReaper {
    stop_signal: Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SessionReaper {
    pub fn start(
        registry: Arc<SessionRegistry>,
        idle_timeout: Duration,
        sweep_interval: Duration,
    ) -> Result<SessionReaper> {
        let (stop_signal, stopped) = bounded(1);
        let thread = thread::Builder::new()
            .name("mapper-session-reaper".to_owned())
            .spawn(move || loop {
                match stopped.recv_timeout(sweep_interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        registry.sweep(idle_timeout);
                    }
                    _ => return,
                }
            })?;
        Ok(SessionReaper {
            stop_signal,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.stop_signal.send(()).ok();
            thread.join().unwrap();
        }
    }
}

impl Drop for SessionReaper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Shared invalidation queues, keyed by the client-repository id presented
/// in the queue query parameter. All sessions of one client repository share
/// one queue.
#[derive(Default)]
pub struct InvalidationRegistry {
    queues: RwLock<HashMap<String, Arc<Mutex<Invalidations>>>>,
}

impl InvalidationRegistry {
    /// Makes sure `queue_id` has a queue, so it starts receiving fan-out
    /// from other clients as soon as its first request arrives.
    pub fn ensure(&self, queue_id: &str) {
        self.queues.write().entry(queue_id.to_owned()).or_default();
    }

    /// Fans invalidations out to every queue except the sender's own.
    pub fn publish(&self, from_queue: &str, invalidations: &Invalidations) {
        if invalidations.is_empty() {
            return;
        }
        for (queue_id, queue) in self.queues.read().iter() {
            if queue_id != from_queue {
                queue.lock().add(invalidations);
            }
        }
    }

    /// Drains the pending invalidations for one queue.
    pub fn drain(&self, queue_id: &str) -> Invalidations {
        match self.queues.read().get(queue_id) {
            Some(queue) => std::mem::take(&mut *queue.lock()),
            None => Invalidations::default(),
        }
    }
}
