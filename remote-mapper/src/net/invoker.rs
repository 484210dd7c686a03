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

use crate::error::{RemoteError, Result, StorageError};
use crate::mapper::{dispatch, Mapper, Repository};
use crate::proto::{Operation, Reply};
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;

enum Request {
    Init,
    Call(Operation),
    Shutdown,
}

impl Request {
    fn name(&self) -> &'static str {
        match self {
            Request::Init => "init",
            Request::Call(operation) => operation.name(),
            Request::Shutdown => "shutdown",
        }
    }
}

type Response = std::result::Result<Reply, RemoteError>;

/// Owns one mapper on a dedicated worker thread.
///
/// The depth-1 channels enforce at most one call in flight, matching the
/// mapper's single-threaded contract; the exchange lock keeps each
/// request/response pair matched when several server threads share one
/// invoker.
pub struct Invoker {
    requests: Sender<Request>,
    responses: Receiver<Response>,
    exchange_lock: Mutex<()>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Invoker {
    /// Spawns the worker and opens the backing mapper. When this returns the
    /// invoker is ready to execute real calls.
    pub fn open(repository: Arc<dyn Repository>) -> Result<Invoker> {
        let (request_send, request_recv) = bounded(1);
        let (response_send, response_recv) = bounded(1);
        let worker = thread::Builder::new()
            .name(format!("mapper-invoker-{}", repository.name()))
            .spawn(move || worker_loop(repository, request_recv, response_send))?;
        let invoker = Invoker {
            requests: request_send,
            responses: response_recv,
            exchange_lock: Mutex::new(()),
            worker: Mutex::new(Some(worker)),
        };
        if let Err(failure) = invoker.exchange(Request::Init) {
            invoker.close();
            return Err(StorageError::Storage(format!(
                "cannot open mapper: {}",
                failure.message
            )));
        }
        Ok(invoker)
    }

    /// Executes one operation on the worker thread, blocking for its result.
    pub fn call(&self, operation: Operation) -> Response {
        self.exchange(Request::Call(operation))
    }

    fn exchange(&self, request: Request) -> Response {
        let _guard = self.exchange_lock.lock();
        let name = request.name();
        if self.requests.send(request).is_err() {
            return Err(RemoteError::new(name, "invoker terminated"));
        }
        self.responses
            .recv()
            .unwrap_or_else(|_| Err(RemoteError::new(name, "invoker terminated")))
    }

    /// Shuts the worker down and joins its thread. After this returns the
    /// thread is no longer alive; later calls fail with a terminated-invoker
    /// error.
    pub fn close(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            self.exchange(Request::Shutdown).ok();
            worker.join().ok();
        }
    }
}

impl Drop for Invoker {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(
    repository: Arc<dyn Repository>,
    requests: Receiver<Request>,
    responses: Sender<Response>,
) {
    let mut mapper: Option<Box<dyn Mapper>> = None;
    while let Ok(request) = requests.recv() {
        match request {
            Request::Shutdown => {
                responses.send(close_mapper(&mut mapper)).ok();
                return;
            }
            Request::Init => {
                let response = match repository.open_mapper() {
                    Ok(opened) => {
                        mapper = Some(opened);
                        Ok(Reply::Unit)
                    }
                    Err(failure) => Err(RemoteError::new("init", failure)),
                };
                if responses.send(response).is_err() {
                    break;
                }
            }
            Request::Call(operation) => {
                let response = execute(&mut mapper, operation);
                if responses.send(response).is_err() {
                    break;
                }
            }
        }
    }
    // The channel can go away without a shutdown exchange; still release the
    // backing session.
    close_mapper(&mut mapper).ok();
}

fn execute(mapper: &mut Option<Box<dyn Mapper>>, operation: Operation) -> Response {
    // Close is a lifecycle action, not a dispatched call.
    if let Operation::Close = operation {
        return close_mapper(mapper);
    }
    let name = operation.name();
    match mapper.as_mut() {
        Some(mapper) => {
            dispatch(mapper.as_mut(), operation).map_err(|e| RemoteError::new(name, e))
        }
        None => Err(RemoteError::new(name, "mapper session already closed")),
    }
}

fn close_mapper(mapper: &mut Option<Box<dyn Mapper>>) -> Response {
    match mapper.take() {
        Some(mut mapper) => mapper
            .close()
            .map(|_| Reply::Unit)
            .map_err(|e| RemoteError::new("close", e)),
        None => Ok(Reply::Unit),
    }
}
