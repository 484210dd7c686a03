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

pub mod client;
pub mod invoker;
pub mod server;
pub mod session;

// This module implements the two halves of the remoting:
//
// A mapper call on the client
// => RemoteMapper encodes it into a call envelope (or buffers it in a batch)
// => one HTTP POST to the dispatch endpoint
// => the server routes it by session id to that session's Invoker thread
// => the Invoker executes it against the real Mapper, one call at a time
// => the single result (or marshaled failure) travels back the same way.

/// Query parameter naming the target repository.
pub const REPOSITORY_PARAM: &str = "repository";
/// Query parameter carrying the mapper session id, once known.
pub const MAPPER_PARAM: &str = "mapper";
/// Query parameter naming the client's shared invalidation queue.
pub const QUEUE_PARAM: &str = "queue";
/// Optional header identifying the calling user, recorded per session.
pub const REMOTE_USER_HEADER: &str = "x-remote-user";

pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";
