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


use crate::mapper::dispatch;
use crate::net::invoker::Invoker;
use crate::proto::{Operation, Reply};
use crate::row::{Row, RowId};
use crate::tests::mock::{CallLog, LogMapper, LogRepository};
use crate::Repository;
use std::sync::Arc;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn dispatch_routes_to_the_right_method() {
    let log = CallLog::default();
    let mut mapper = LogMapper::new(log.clone());

    let reply = dispatch(
        &mut mapper,
        Operation::TableSize {
            table: "doc".to_owned(),
        },
    )
    .unwrap();
    assert_eq!(reply, Reply::Size(42));

    let reply = dispatch(
        &mut mapper,
        Operation::InsertRow {
            row: Row::new("doc", "r1"),
        },
    )
    .unwrap();
    assert_eq!(reply, Reply::RowId(RowId::from("r1")));

    assert_eq!(
        log.lock().clone(),
        vec!["table_size doc".to_owned(), "insert_row doc/r1".to_owned()]
    );
}

#[test]
fn invoker_executes_calls_in_order() {
    init_logger();
    let repository = LogRepository::new();
    let invoker = Invoker::open(repository.clone() as Arc<dyn Repository>).unwrap();

    invoker
        .call(Operation::InsertRow {
            row: Row::new("doc", "r1"),
        })
        .unwrap();
    invoker
        .call(Operation::InsertRow {
            row: Row::new("doc", "r2"),
        })
        .unwrap();
    invoker
        .call(Operation::DeleteRow {
            table: "doc".to_owned(),
            id: RowId::from("r1"),
        })
        .unwrap();
    invoker.close();

    assert_eq!(
        repository.call_log(),
        vec![
            "insert_row doc/r1".to_owned(),
            "insert_row doc/r2".to_owned(),
            "delete_row doc/r1".to_owned(),
            "close".to_owned(),
        ]
    );
}

#[test]
fn invoker_wraps_mapper_failures_with_the_operation_name() {
    init_logger();
    let repository = LogRepository::failing_on("table_size");
    let invoker = Invoker::open(repository.clone() as Arc<dyn Repository>).unwrap();

    let failure = invoker
        .call(Operation::TableSize {
            table: "doc".to_owned(),
        })
        .unwrap_err();
    assert_eq!(failure.operation, "table_size");
    assert!(failure.message.contains("boom"), "{}", failure.message);

    // The worker survives a failed call.
    let reply = invoker
        .call(Operation::ReadRow {
            table: "doc".to_owned(),
            id: RowId::from("r1"),
        })
        .unwrap();
    assert_eq!(reply, Reply::OptRow(None));
    invoker.close();
}

#[test]
fn invoker_open_fails_when_the_backend_is_unreachable() {
    init_logger();
    let repository = LogRepository::unopenable();
    let failure = Invoker::open(repository as Arc<dyn Repository>).unwrap_err();
    assert!(
        failure.to_string().contains("cannot reach backend"),
        "{}",
        failure
    );
}

#[test]
fn invoker_close_releases_the_worker() {
    init_logger();
    let repository = LogRepository::new();
    let invoker = Invoker::open(repository.clone() as Arc<dyn Repository>).unwrap();
    invoker.close();

    // The mapper was closed exactly once, and the worker is gone: further
    // calls fail instead of blocking forever.
    assert_eq!(repository.call_log(), vec!["close".to_owned()]);
    let failure = invoker.call(Operation::ReceiveInvalidations).unwrap_err();
    assert!(failure.message.contains("terminated"), "{}", failure.message);

    // Closing again is harmless.
    invoker.close();
    assert_eq!(repository.call_log(), vec!["close".to_owned()]);
}

#[test]
fn calls_after_a_closed_mapper_are_rejected() {
    init_logger();
    let repository = LogRepository::new();
    let invoker = Invoker::open(repository.clone() as Arc<dyn Repository>).unwrap();

    invoker.call(Operation::Close).unwrap();
    let failure = invoker
        .call(Operation::TableSize {
            table: "doc".to_owned(),
        })
        .unwrap_err();
    assert!(failure.message.contains("closed"), "{}", failure.message);
    invoker.close();
}
