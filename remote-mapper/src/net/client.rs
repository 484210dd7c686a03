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
use crate::mapper::{Mapper, MapperId};
use crate::net;
use crate::proto::{self, Operation, RemoteResult, Reply};
use crate::row::{Invalidations, Row, RowId, Value};
use crate::xid::Xid;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientConfig {
    /// Endpoint URL including the dispatch path.
    pub url: String,
    /// Name of the server-side repository to bind to.
    pub repository: String,
    /// Client-repository id; sessions sharing it share one invalidation
    /// queue on the server.
    pub queue: Option<String>,
    /// Recorded server-side per session, for observability only.
    pub user: Option<String>,
    /// Round-trip timeout in milliseconds.
    pub timeout_ms: u64,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, repository: impl Into<String>) -> Self {
        ClientConfig {
            url: url.into(),
            repository: repository.into(),
            queue: None,
            user: None,
            timeout_ms: 30_000,
        }
    }
}

/// Remote mapper proxy: presents the local [`Mapper`] interface for a mapper
/// that is physically reachable only over HTTP.
///
/// The first round trip is an identification call; the session id it yields
/// is attached as a query parameter to every subsequent request so the
/// server routes to the same worker. While a batch is active, calls are
/// buffered in memory and never block on I/O until the flush.
pub struct RemoteMapper {
    http: Client,
    config: ClientConfig,
    mapper_id: Option<MapperId>,
    batch: Option<Vec<Operation>>,
}

impl RemoteMapper {
    /// Connects and performs the identification round trip.
    pub fn connect(config: ClientConfig) -> Result<RemoteMapper> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        let mut mapper = RemoteMapper {
            http,
            config,
            mapper_id: None,
            batch: None,
        };
        mapper.invoke(Operation::Identification)?;
        Ok(mapper)
    }

    /// The session id minted by the server, once known.
    pub fn mapper_id(&self) -> Option<&MapperId> {
        self.mapper_id.as_ref()
    }

    fn invoke(&mut self, operation: Operation) -> Result<Reply> {
        if let Some(batch) = self.batch.as_mut() {
            batch.push(operation);
            return Ok(Reply::Unit);
        }
        self.transmit(vec![operation])
    }

    /// One HTTP round trip carrying `operations` as a single envelope.
    fn transmit(&mut self, operations: Vec<Operation>) -> Result<Reply> {
        let mut body = Vec::new();
        proto::write_envelope(&mut body, &operations)?;

        let mut query: Vec<(&str, String)> =
            vec![(net::REPOSITORY_PARAM, self.config.repository.clone())];
        if let Some(mapper_id) = &self.mapper_id {
            query.push((net::MAPPER_PARAM, mapper_id.0.clone()));
        }
        if let Some(queue) = &self.config.queue {
            query.push((net::QUEUE_PARAM, queue.clone()));
        }

        let mut request = self
            .http
            .post(self.config.url.as_str())
            .query(&query)
            .header(CONTENT_TYPE, net::CONTENT_TYPE_OCTET_STREAM)
            .body(body);
        if let Some(user) = &self.config.user {
            request = request.header(net::REMOTE_USER_HEADER, user);
        }
        let response = request
            .send()
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            let detail = response.text().unwrap_or_default();
            return Err(StorageError::Transport(format!(
                "server returned {}: {}",
                status,
                detail.trim()
            )));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        if content_type != net::CONTENT_TYPE_OCTET_STREAM {
            return Err(StorageError::Transport(format!(
                "unexpected response content type: {}",
                content_type
            )));
        }
        let bytes = response
            .bytes()
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        let result: RemoteResult = bincode::deserialize(&bytes)
            .map_err(|e| StorageError::Protocol(format!("cannot decode reply: {}", e)))?;
        let reply = result?;
        if let Reply::Identification(mapper_id) = &reply {
            self.mapper_id = Some(mapper_id.clone());
        }
        Ok(reply)
    }

    fn unexpected(operation: &str, reply: Reply) -> StorageError {
        StorageError::Protocol(format!("unexpected reply to {}: {:?}", operation, reply))
    }
}

impl Mapper for RemoteMapper {
    fn identification(&mut self) -> Result<MapperId> {
        if let Some(mapper_id) = &self.mapper_id {
            return Ok(mapper_id.clone());
        }
        match self.invoke(Operation::Identification)? {
            Reply::Identification(mapper_id) => Ok(mapper_id),
            other => Err(Self::unexpected("identification", other)),
        }
    }

    fn create_database(&mut self) -> Result<()> {
        // Database creation is a server-side responsibility; opening the
        // remote mapper already ensured it.
        Ok(())
    }

    fn table_size(&mut self, table: &str) -> Result<i64> {
        match self.invoke(Operation::TableSize {
            table: table.to_owned(),
        })? {
            Reply::Size(size) => Ok(size),
            Reply::Unit => Ok(0), // buffered during a batch
            other => Err(Self::unexpected("table_size", other)),
        }
    }

    fn insert_row(&mut self, row: Row) -> Result<RowId> {
        let id = row.id.clone();
        match self.invoke(Operation::InsertRow { row })? {
            Reply::RowId(id) => Ok(id),
            // Buffered during a batch; ids are caller-assigned anyway.
            Reply::Unit => Ok(id),
            other => Err(Self::unexpected("insert_row", other)),
        }
    }

    fn read_row(&mut self, table: &str, id: &RowId) -> Result<Option<Row>> {
        match self.invoke(Operation::ReadRow {
            table: table.to_owned(),
            id: id.clone(),
        })? {
            Reply::OptRow(row) => Ok(row),
            Reply::Unit => Ok(None), // buffered during a batch
            other => Err(Self::unexpected("read_row", other)),
        }
    }

    fn update_row(&mut self, row: Row) -> Result<()> {
        match self.invoke(Operation::UpdateRow { row })? {
            Reply::Unit => Ok(()),
            other => Err(Self::unexpected("update_row", other)),
        }
    }

    fn delete_row(&mut self, table: &str, id: &RowId) -> Result<()> {
        match self.invoke(Operation::DeleteRow {
            table: table.to_owned(),
            id: id.clone(),
        })? {
            Reply::Unit => Ok(()),
            other => Err(Self::unexpected("delete_row", other)),
        }
    }

    fn read_children(&mut self, parent: &RowId) -> Result<Vec<Row>> {
        match self.invoke(Operation::ReadChildren {
            parent: parent.clone(),
        })? {
            Reply::Rows(rows) => Ok(rows),
            Reply::Unit => Ok(Vec::new()), // buffered during a batch
            other => Err(Self::unexpected("read_children", other)),
        }
    }

    fn read_collection(&mut self, table: &str, id: &RowId) -> Result<Vec<Value>> {
        match self.invoke(Operation::ReadCollection {
            table: table.to_owned(),
            id: id.clone(),
        })? {
            Reply::Values(values) => Ok(values),
            Reply::Unit => Ok(Vec::new()), // buffered during a batch
            other => Err(Self::unexpected("read_collection", other)),
        }
    }

    fn update_collection(&mut self, table: &str, id: &RowId, values: Vec<Value>) -> Result<()> {
        match self.invoke(Operation::UpdateCollection {
            table: table.to_owned(),
            id: id.clone(),
            values,
        })? {
            Reply::Unit => Ok(()),
            other => Err(Self::unexpected("update_collection", other)),
        }
    }

    fn search(&mut self, query: &str) -> Result<Vec<RowId>> {
        match self.invoke(Operation::Search {
            query: query.to_owned(),
        })? {
            Reply::Ids(ids) => Ok(ids),
            Reply::Unit => Ok(Vec::new()), // buffered during a batch
            other => Err(Self::unexpected("search", other)),
        }
    }

    fn send_invalidations(&mut self, invalidations: Invalidations) -> Result<()> {
        match self.invoke(Operation::SendInvalidations { invalidations })? {
            Reply::Unit => Ok(()),
            other => Err(Self::unexpected("send_invalidations", other)),
        }
    }

    fn receive_invalidations(&mut self) -> Result<Invalidations> {
        match self.invoke(Operation::ReceiveInvalidations)? {
            Reply::Invalidations(invalidations) => Ok(invalidations),
            Reply::Unit => Ok(Invalidations::default()), // buffered during a batch
            other => Err(Self::unexpected("receive_invalidations", other)),
        }
    }

    fn begin(&mut self, xid: Xid) -> Result<()> {
        match self.invoke(Operation::Begin { xid })? {
            Reply::Unit => Ok(()),
            other => Err(Self::unexpected("begin", other)),
        }
    }

    fn commit(&mut self, xid: Xid, one_phase: bool) -> Result<()> {
        match self.invoke(Operation::Commit { xid, one_phase })? {
            Reply::Unit => Ok(()),
            other => Err(Self::unexpected("commit", other)),
        }
    }

    fn rollback(&mut self, xid: Xid) -> Result<()> {
        match self.invoke(Operation::Rollback { xid })? {
            Reply::Unit => Ok(()),
            other => Err(Self::unexpected("rollback", other)),
        }
    }

    fn close(&mut self) -> Result<()> {
        // The session id is kept: presenting it after close must be rejected
        // by the server, not silently turned into a fresh session.
        match self.invoke(Operation::Close)? {
            Reply::Unit => Ok(()),
            other => Err(Self::unexpected("close", other)),
        }
    }

    fn begin_batch(&mut self) -> Result<()> {
        self.batch = Some(Vec::new());
        Ok(())
    }

    fn end_batch(&mut self) -> Result<Reply> {
        // Taking the buffer first resets batch state even if the flush fails.
        let operations = match self.batch.take() {
            Some(operations) => operations,
            None => return Ok(Reply::Unit),
        };
        if operations.is_empty() {
            return Ok(Reply::Unit);
        }
        log::debug!("flushing batch of {} mapper calls", operations.len());
        self.transmit(operations)
    }
}
