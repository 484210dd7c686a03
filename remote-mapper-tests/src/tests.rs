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

use crate::memory::MemoryRepository;
use remote_mapper::{
    ClientConfig, Invalidations, Mapper, NetServer, RemoteMapper, Reply, Repository, Row, RowId,
    ServerConfig, StorageError, Value, Xid,
};
use std::sync::Arc;
use std::time::Duration;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn start_server(repository: &Arc<MemoryRepository>) -> NetServer {
    let config = ServerConfig {
        bind: "127.0.0.1:0".to_owned(),
        ..ServerConfig::default()
    };
    NetServer::start(config, vec![repository.clone() as Arc<dyn Repository>]).unwrap()
}

fn connect(server: &NetServer, repository: &str) -> RemoteMapper {
    RemoteMapper::connect(ClientConfig::new(server.endpoint_url(), repository)).unwrap()
}

/// Request count of the single live session.
fn request_count(server: &NetServer) -> u64 {
    let sessions = server.sessions();
    assert_eq!(sessions.len(), 1);
    sessions[0].1.request_count
}

#[test]
fn identification_creates_one_session_and_caches_the_id() {
    init_logger();
    let repository = MemoryRepository::new("db");
    let mut server = start_server(&repository);

    let mut mapper = connect(&server, "db");
    let sessions = server.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(request_count(&server), 1);

    let mapper_id = mapper.mapper_id().cloned().unwrap();
    assert_eq!(mapper_id.0, sessions[0].0);
    assert!(mapper_id.0.starts_with("db-mem-"), "{}", mapper_id);

    // Cached: no further round trip.
    assert_eq!(mapper.identification().unwrap(), mapper_id);
    assert_eq!(request_count(&server), 1);

    // A real call routes to the same session.
    mapper.insert_row(Row::new("doc", "r1")).unwrap();
    assert_eq!(server.sessions().len(), 1);
    assert_eq!(request_count(&server), 2);

    server.stop();
}

#[test]
fn calls_execute_in_order_with_no_interleaving() {
    init_logger();
    let repository = MemoryRepository::new("db");
    let mut server = start_server(&repository);

    let mut mapper = connect(&server, "db");
    mapper.insert_row(Row::new("doc", "r1")).unwrap();
    mapper.insert_row(Row::new("doc", "r2")).unwrap();
    assert_eq!(
        mapper.read_row("doc", &RowId::from("r1")).unwrap().unwrap(),
        Row::new("doc", "r1")
    );
    mapper.delete_row("doc", &RowId::from("r2")).unwrap();

    // The first two log entries are the session-setup identification and the
    // client's own identification call.
    assert_eq!(
        &repository.call_log()[2..],
        &[
            "insert_row doc/r1".to_owned(),
            "insert_row doc/r2".to_owned(),
            "read_row doc/r1".to_owned(),
            "delete_row doc/r2".to_owned(),
        ][..]
    );
    server.stop();
}

#[test]
fn batch_flushes_as_one_round_trip() {
    init_logger();
    let repository = MemoryRepository::new("db");
    let mut server = start_server(&repository);

    let mut mapper = connect(&server, "db");
    mapper.begin_batch().unwrap();
    let first = mapper.insert_row(Row::new("doc", "r1")).unwrap();
    assert_eq!(first, RowId::from("r1"));
    mapper.insert_row(Row::new("doc", "r2")).unwrap();

    // Buffered: nothing but the identification has reached the server.
    assert_eq!(repository.call_log().len(), 2);
    assert_eq!(request_count(&server), 1);

    // The flush is one POST and returns the last call's reply, exactly what
    // the call alone would have returned.
    let reply = mapper.end_batch().unwrap();
    assert_eq!(reply, Reply::RowId(RowId::from("r2")));
    assert_eq!(request_count(&server), 2);
    assert_eq!(
        &repository.call_log()[2..],
        &["insert_row doc/r1".to_owned(), "insert_row doc/r2".to_owned()][..]
    );

    // Batch state is gone; calls go out immediately again.
    assert_eq!(mapper.table_size("doc").unwrap(), 2);
    assert_eq!(request_count(&server), 3);

    // An empty batch does not even make a round trip.
    mapper.begin_batch().unwrap();
    assert_eq!(mapper.end_batch().unwrap(), Reply::Unit);
    assert_eq!(request_count(&server), 3);

    server.stop();
}

#[test]
fn batch_failure_resets_batch_state() {
    init_logger();
    let repository = MemoryRepository::new("db");
    let mut server = start_server(&repository);

    let mut mapper = connect(&server, "db");
    mapper.begin_batch().unwrap();
    // Updating a missing row fails server-side at flush time.
    mapper.update_row(Row::new("doc", "ghost")).unwrap();
    mapper.end_batch().unwrap_err();

    // The buffer was cleared despite the failure.
    assert_eq!(mapper.table_size("doc").unwrap(), 0);
    server.stop();
}

#[test]
fn remote_failures_keep_their_message() {
    init_logger();
    let repository = MemoryRepository::new("db");
    let mut server = start_server(&repository);

    let mut mapper = connect(&server, "db");
    let failure = mapper.update_row(Row::new("doc", "ghost")).unwrap_err();
    match failure {
        StorageError::Remote(remote) => {
            assert_eq!(remote.operation, "update_row");
            assert!(remote.message.contains("no such row"), "{}", remote.message);
        }
        other => panic!("expected a remote failure, got {:?}", other),
    }

    // The session survives the failure.
    mapper.insert_row(Row::new("doc", "r1")).unwrap();
    server.stop();
}

#[test]
fn close_evicts_the_session_and_stale_ids_are_rejected() {
    init_logger();
    let repository = MemoryRepository::new("db");
    let mut server = start_server(&repository);

    let mut mapper = connect(&server, "db");
    assert_eq!(server.sessions().len(), 1);

    mapper.close().unwrap();
    assert!(server.sessions().is_empty());
    assert!(repository.call_log().contains(&"close".to_owned()));

    // The proxy still presents the defunct id; the server must reject it
    // instead of minting a fresh session.
    let failure = mapper.table_size("doc").unwrap_err();
    match failure {
        StorageError::Transport(message) => {
            assert!(message.contains("unknown mapper session"), "{}", message)
        }
        other => panic!("expected a transport failure, got {:?}", other),
    }
    assert!(server.sessions().is_empty());

    server.stop();
}

#[test]
fn idle_sessions_are_reaped() {
    init_logger();
    let repository = MemoryRepository::new("db");
    let config = ServerConfig {
        bind: "127.0.0.1:0".to_owned(),
        idle_timeout_ms: 150,
        sweep_interval_ms: 50,
        ..ServerConfig::default()
    };
    let mut server =
        NetServer::start(config, vec![repository.clone() as Arc<dyn Repository>]).unwrap();

    let _mapper = connect(&server, "db");
    assert_eq!(server.sessions().len(), 1);

    std::thread::sleep(Duration::from_millis(600));
    assert!(server.sessions().is_empty());
    assert!(repository.call_log().contains(&"close".to_owned()));

    server.stop();
}

#[test]
fn unknown_repository_is_rejected() {
    init_logger();
    let repository = MemoryRepository::new("db");
    let mut server = start_server(&repository);

    let failure =
        RemoteMapper::connect(ClientConfig::new(server.endpoint_url(), "nope")).unwrap_err();
    match failure {
        StorageError::Transport(message) => {
            assert!(message.contains("no such repository"), "{}", message)
        }
        other => panic!("expected a transport failure, got {:?}", other),
    }
    assert!(server.sessions().is_empty());

    server.stop();
}

#[test]
fn create_database_is_local_on_the_proxy() {
    init_logger();
    let repository = MemoryRepository::new("db");
    let mut server = start_server(&repository);

    let mut mapper = connect(&server, "db");
    mapper.create_database().unwrap();
    assert!(!repository.call_log().contains(&"create_database".to_owned()));
    assert_eq!(request_count(&server), 1);

    server.stop();
}

#[test]
fn hierarchy_collections_and_search_round_trip() {
    init_logger();
    let repository = MemoryRepository::new("db");
    let mut server = start_server(&repository);

    let mut mapper = connect(&server, "db");
    mapper
        .insert_row(Row::new("hierarchy", "root").with("title", Value::Text("Root".to_owned())))
        .unwrap();
    mapper
        .insert_row(
            Row::new("hierarchy", "child-1")
                .with("parent", Value::Text("root".to_owned()))
                .with("title", Value::Text("First chapter".to_owned())),
        )
        .unwrap();
    mapper
        .insert_row(
            Row::new("hierarchy", "child-2")
                .with("parent", Value::Text("root".to_owned()))
                .with("title", Value::Text("Second chapter".to_owned())),
        )
        .unwrap();

    let children = mapper.read_children(&RowId::from("root")).unwrap();
    let mut child_ids: Vec<RowId> = children.into_iter().map(|row| row.id).collect();
    child_ids.sort();
    assert_eq!(child_ids, vec![RowId::from("child-1"), RowId::from("child-2")]);

    mapper
        .update_collection(
            "keywords",
            &RowId::from("child-1"),
            vec![
                Value::Text("alpha".to_owned()),
                Value::Text("beta".to_owned()),
            ],
        )
        .unwrap();
    assert_eq!(
        mapper
            .read_collection("keywords", &RowId::from("child-1"))
            .unwrap(),
        vec![
            Value::Text("alpha".to_owned()),
            Value::Text("beta".to_owned()),
        ]
    );

    assert_eq!(
        mapper.search("chapter").unwrap(),
        vec![RowId::from("child-1"), RowId::from("child-2")]
    );

    server.stop();
}

#[test]
fn xa_boundaries_reach_the_backend() {
    init_logger();
    let repository = MemoryRepository::new("db");
    let mut server = start_server(&repository);

    let mut mapper = connect(&server, "db");
    let xid = Xid::from_global("gtx-42");
    mapper.begin(xid.clone()).unwrap();
    mapper.insert_row(Row::new("doc", "r1")).unwrap();
    mapper.commit(xid, true).unwrap();

    let log = repository.call_log();
    assert!(log.contains(&"begin gtx-42".to_owned()));
    assert!(log.contains(&"commit gtx-42 one_phase=true".to_owned()));

    server.stop();
}

#[test]
fn invalidations_fan_out_between_queued_clients() {
    init_logger();
    let repository = MemoryRepository::new("db");
    let mut server = start_server(&repository);

    let mut config_a = ClientConfig::new(server.endpoint_url(), "db");
    config_a.queue = Some("node-a".to_owned());
    let mut config_b = ClientConfig::new(server.endpoint_url(), "db");
    config_b.queue = Some("node-b".to_owned());

    let mut client_a = RemoteMapper::connect(config_a).unwrap();
    let mut client_b = RemoteMapper::connect(config_b).unwrap();

    let mut invalidations = Invalidations::default();
    invalidations.modified.insert(RowId::from("r1"));
    invalidations.deleted.insert(RowId::from("r2"));
    client_a.send_invalidations(invalidations.clone()).unwrap();

    // The sender's own queue stays empty; the other client drains the set
    // exactly once.
    assert!(client_a.receive_invalidations().unwrap().is_empty());
    assert_eq!(client_b.receive_invalidations().unwrap(), invalidations);
    assert!(client_b.receive_invalidations().unwrap().is_empty());

    server.stop();
}

#[test]
fn invalidations_without_a_queue_hit_the_backend() {
    init_logger();
    let repository = MemoryRepository::new("db");
    let mut server = start_server(&repository);

    let mut sender = connect(&server, "db");
    let mut receiver = connect(&server, "db");

    let mut invalidations = Invalidations::default();
    invalidations.modified.insert(RowId::from("r1"));
    sender.send_invalidations(invalidations.clone()).unwrap();

    assert_eq!(receiver.receive_invalidations().unwrap(), invalidations);
    assert!(repository
        .call_log()
        .contains(&"send_invalidations".to_owned()));

    server.stop();
}

#[test]
fn remote_user_is_recorded_per_session() {
    init_logger();
    let repository = MemoryRepository::new("db");
    let mut server = start_server(&repository);

    let mut config = ClientConfig::new(server.endpoint_url(), "db");
    config.user = Some("alice".to_owned());
    let _mapper = RemoteMapper::connect(config).unwrap();

    let sessions = server.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].1.remote_user.as_deref(), Some("alice"));
    assert!(sessions[0].1.remote_addr.is_some());

    server.stop();
}

#[test]
fn sessions_are_independent() {
    init_logger();
    let repository = MemoryRepository::new("db");
    let mut server = start_server(&repository);

    let mut first = connect(&server, "db");
    let mut second = connect(&server, "db");
    assert_eq!(server.sessions().len(), 2);

    first.insert_row(Row::new("doc", "r1")).unwrap();
    second.insert_row(Row::new("doc", "r2")).unwrap();

    // Closing one session leaves the other fully usable.
    first.close().unwrap();
    assert_eq!(server.sessions().len(), 1);
    assert_eq!(second.table_size("doc").unwrap(), 2);

    server.stop();
}
