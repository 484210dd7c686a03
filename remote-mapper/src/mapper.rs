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
use crate::proto::{Operation, Reply};
use crate::row::{Invalidations, Row, RowId, Value};
use crate::xid::Xid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a mapper session as seen by the remote protocol.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct MapperId(pub String);

impl fmt::Display for MapperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The row-level persistence interface being proxied.
///
/// Implementations are not expected to be safe for concurrent use; the net
/// layer guarantees at most one call in flight per instance.
pub trait Mapper: Send {
    fn identification(&mut self) -> Result<MapperId>;

    /// Ensures the backing database and its tables exist.
    fn create_database(&mut self) -> Result<()>;

    fn table_size(&mut self, table: &str) -> Result<i64>;

    /// Inserts a row under its caller-assigned id, returning that id.
    fn insert_row(&mut self, row: Row) -> Result<RowId>;

    fn read_row(&mut self, table: &str, id: &RowId) -> Result<Option<Row>>;

    fn update_row(&mut self, row: Row) -> Result<()>;

    fn delete_row(&mut self, table: &str, id: &RowId) -> Result<()>;

    /// Hierarchy children of `parent`, in storage order.
    fn read_children(&mut self, parent: &RowId) -> Result<Vec<Row>>;

    fn read_collection(&mut self, table: &str, id: &RowId) -> Result<Vec<Value>>;

    fn update_collection(&mut self, table: &str, id: &RowId, values: Vec<Value>) -> Result<()>;

    /// Ids of the rows matching `query`.
    fn search(&mut self, query: &str) -> Result<Vec<RowId>>;

    fn send_invalidations(&mut self, invalidations: Invalidations) -> Result<()>;

    fn receive_invalidations(&mut self) -> Result<Invalidations>;

    fn begin(&mut self, xid: Xid) -> Result<()>;

    fn commit(&mut self, xid: Xid, one_phase: bool) -> Result<()>;

    fn rollback(&mut self, xid: Xid) -> Result<()>;

    /// Releases the backing session. Further calls are invalid.
    fn close(&mut self) -> Result<()>;

    /// Starts buffering calls. Only meaningful on a remote proxy; local
    /// mappers execute everything immediately.
    fn begin_batch(&mut self) -> Result<()> {
        Ok(())
    }

    /// Flushes buffered calls and returns the last call's reply.
    fn end_batch(&mut self) -> Result<Reply> {
        Ok(Reply::Unit)
    }
}

/// Server-side factory binding mapper sessions to a named repository.
pub trait Repository: Send + Sync {
    fn name(&self) -> &str;

    fn open_mapper(&self) -> Result<Box<dyn Mapper>>;
}

/// Statically-checked dispatch table: one arm per wire operation.
pub fn dispatch(mapper: &mut dyn Mapper, operation: Operation) -> Result<Reply> {
    match operation {
        Operation::Identification => mapper.identification().map(Reply::Identification),
        Operation::CreateDatabase => mapper.create_database().map(|_| Reply::Unit),
        Operation::TableSize { table } => mapper.table_size(&table).map(Reply::Size),
        Operation::InsertRow { row } => mapper.insert_row(row).map(Reply::RowId),
        Operation::ReadRow { table, id } => mapper.read_row(&table, &id).map(Reply::OptRow),
        Operation::UpdateRow { row } => mapper.update_row(row).map(|_| Reply::Unit),
        Operation::DeleteRow { table, id } => mapper.delete_row(&table, &id).map(|_| Reply::Unit),
        Operation::ReadChildren { parent } => mapper.read_children(&parent).map(Reply::Rows),
        Operation::ReadCollection { table, id } => {
            mapper.read_collection(&table, &id).map(Reply::Values)
        }
        Operation::UpdateCollection { table, id, values } => {
            mapper.update_collection(&table, &id, values).map(|_| Reply::Unit)
        }
        Operation::Search { query } => mapper.search(&query).map(Reply::Ids),
        Operation::SendInvalidations { invalidations } => {
            mapper.send_invalidations(invalidations).map(|_| Reply::Unit)
        }
        Operation::ReceiveInvalidations => {
            mapper.receive_invalidations().map(Reply::Invalidations)
        }
        Operation::Begin { xid } => mapper.begin(xid).map(|_| Reply::Unit),
        Operation::Commit { xid, one_phase } => mapper.commit(xid, one_phase).map(|_| Reply::Unit),
        Operation::Rollback { xid } => mapper.rollback(xid).map(|_| Reply::Unit),
        Operation::Close => mapper.close().map(|_| Reply::Unit),
    }
}
