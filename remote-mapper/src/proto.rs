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
use crate::mapper::MapperId;
use crate::row::{Invalidations, Row, RowId, Value};
use crate::xid::Xid;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// One remote invocation: the variant is the method, the fields are the
/// arguments.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Operation {
    Identification,
    CreateDatabase,
    TableSize { table: String },
    InsertRow { row: Row },
    ReadRow { table: String, id: RowId },
    UpdateRow { row: Row },
    DeleteRow { table: String, id: RowId },
    ReadChildren { parent: RowId },
    ReadCollection { table: String, id: RowId },
    UpdateCollection { table: String, id: RowId, values: Vec<Value> },
    Search { query: String },
    SendInvalidations { invalidations: Invalidations },
    ReceiveInvalidations,
    Begin { xid: Xid },
    Commit { xid: Xid, one_phase: bool },
    Rollback { xid: Xid },
    Close,
}

impl Operation {
    /// Stable name used in logs and marshaled failures.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Identification => "identification",
            Operation::CreateDatabase => "create_database",
            Operation::TableSize { .. } => "table_size",
            Operation::InsertRow { .. } => "insert_row",
            Operation::ReadRow { .. } => "read_row",
            Operation::UpdateRow { .. } => "update_row",
            Operation::DeleteRow { .. } => "delete_row",
            Operation::ReadChildren { .. } => "read_children",
            Operation::ReadCollection { .. } => "read_collection",
            Operation::UpdateCollection { .. } => "update_collection",
            Operation::Search { .. } => "search",
            Operation::SendInvalidations { .. } => "send_invalidations",
            Operation::ReceiveInvalidations => "receive_invalidations",
            Operation::Begin { .. } => "begin",
            Operation::Commit { .. } => "commit",
            Operation::Rollback { .. } => "rollback",
            Operation::Close => "close",
        }
    }
}

/// Result of one envelope. Exactly one of these is serialized per HTTP
/// round trip, whether the envelope carried one call or a whole batch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Reply {
    Unit,
    Identification(MapperId),
    Size(i64),
    RowId(RowId),
    OptRow(Option<Row>),
    Rows(Vec<Row>),
    Values(Vec<Value>),
    Ids(Vec<RowId>),
    Invalidations(Invalidations),
}

pub type RemoteResult = std::result::Result<Reply, RemoteError>;

const CALL_MARKER: u8 = 0x01;
// Not a valid call marker; terminates an envelope.
const END_MARKER: u8 = 0x00;

/// Appends `operations` to `out` as one envelope: each call is preceded by a
/// call marker and the sequence is terminated by the sentinel, so the reader
/// needs no length prefix.
pub fn write_envelope(out: &mut Vec<u8>, operations: &[Operation]) -> Result<()> {
    for operation in operations {
        out.push(CALL_MARKER);
        bincode::serialize_into(&mut *out, operation).map_err(|e| {
            StorageError::Protocol(format!("cannot encode {}: {}", operation.name(), e))
        })?;
    }
    out.push(END_MARKER);
    Ok(())
}

/// Reads calls until the sentinel. Bytes after the sentinel are ignored; a
/// stream ending without one is a protocol violation.
pub fn read_envelope(input: &[u8]) -> Result<Vec<Operation>> {
    let mut cursor = input;
    let mut operations = Vec::new();
    loop {
        let mut marker = [0u8; 1];
        cursor
            .read_exact(&mut marker)
            .map_err(|_| StorageError::Protocol("envelope ended without sentinel".to_owned()))?;
        match marker[0] {
            END_MARKER => return Ok(operations),
            CALL_MARKER => {
                let operation = bincode::deserialize_from(&mut cursor).map_err(|e| {
                    StorageError::Protocol(format!(
                        "cannot decode call {}: {}",
                        operations.len(),
                        e
                    ))
                })?;
                operations.push(operation);
            }
            other => {
                return Err(StorageError::Protocol(format!(
                    "bad call marker {:#04x}",
                    other
                )))
            }
        }
    }
}
