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

//! Transparent HTTP remoting for a row-level storage mapper.
//!
//! A [`Mapper`] that physically lives in a server process is presented to the
//! client as an ordinary local object: every call is serialized into a call
//! envelope, posted to the dispatch endpoint, executed there by a per-session
//! worker thread owning the real mapper, and the single result (or marshaled
//! failure) is returned to the caller as if the call had never left the
//! process. Calls can also be buffered client-side and flushed as one
//! multi-call envelope in a single round trip.

mod error;
mod mapper;
pub mod net;
mod proto;
mod row;
#[cfg(test)]
mod tests;
mod xid;

pub use error::{RemoteError, Result, StorageError};
pub use mapper::{dispatch, Mapper, MapperId, Repository};
pub use net::client::{ClientConfig, RemoteMapper};
pub use net::invoker::Invoker;
pub use net::server::{NetServer, ServerConfig};
pub use net::session::{ClientInfo, InvalidationRegistry, SessionRegistry};
pub use proto::{read_envelope, write_envelope, Operation, RemoteResult, Reply};
pub use row::{Invalidations, Row, RowId, Value};
pub use xid::Xid;
