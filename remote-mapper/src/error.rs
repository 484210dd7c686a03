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

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Failure of one remote call, marshaled as plain strings.
///
/// Only the operation name and the failure's description cross the wire, so
/// an error type unknown on the receiving side can never turn into a
/// secondary deserialization failure.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("remote {operation} failed: {message}")]
pub struct RemoteError {
    pub operation: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(operation: &str, message: impl std::fmt::Display) -> Self {
        RemoteError {
            operation: operation.to_owned(),
            message: message.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    /// Connection-level or HTTP-level failure talking to the server. Never
    /// retried; the failed call must be re-issued by the application.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Malformed envelope, undecodable payload, or a reply of the wrong
    /// shape for the call that produced it.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A session id was presented that the server does not know.
    #[error("unknown mapper session: {0}")]
    UnknownSession(String),

    /// The call executed on the server and failed there.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Failure inside the storage backend itself.
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}
