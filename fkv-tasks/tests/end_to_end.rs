use serde_json::json;

use fkv_client::ConnectionPool;
use fkv_common::{
    AddInput, CommandInput, ConnectionDescriptor, DeleteInput, GetInput, GetOutput,
    KeyValuePairInput, ObjectType, SetInput, StoreValue, TaskOptions, WhenValueExists,
};
use fkv_tasks::{add, command, get, remove, CancellationToken};
use fkv_testkit::FakeServer;

fn kv(key: &str) -> Vec<StoreValue> {
    vec![StoreValue::from(key)]
}

#[test]
fn key_value_lifecycle_over_tcp() {
    let server = FakeServer::start().expect("start server");
    let pool = ConnectionPool::tcp();
    let connection = ConnectionDescriptor::new(server.connection_string());
    let options = TaskOptions::default();
    let cancel = CancellationToken::new();

    let mut only_new = KeyValuePairInput::new("greeting", "again");
    only_new.value_exists = WhenValueExists::InsertOnlyIfValueDoesNotExist;
    let mut only_existing = KeyValuePairInput::new("absent", "x");
    only_existing.value_exists = WhenValueExists::InsertOnlyIfValueExists;
    let input = AddInput {
        input_object_type: ObjectType::KeyValuePair,
        key_value_pair_input: vec![
            KeyValuePairInput::new("greeting", "hello"),
            only_new,
            only_existing,
            KeyValuePairInput::new("answer", 42i64),
        ],
        set_input: Vec::new(),
    };
    let results = add(&pool, &input, &connection, &options, &cancel).unwrap();
    let applied: Vec<bool> = results.iter().map(|result| result.success).collect();
    assert_eq!(applied, vec![true, false, false, true]);
    assert_eq!(results[3].value, json!(42));

    let input = GetInput {
        object_type: ObjectType::KeyValuePair,
        key: vec![StoreValue::from("greeting"), StoreValue::from("absent"), StoreValue::from("answer")],
        set_key: None,
    };
    let output = get(&pool, &input, &connection, &options, &cancel).unwrap();
    assert_eq!(
        output,
        GetOutput::Values(vec![Some(StoreValue::from("hello")), None, Some(StoreValue::from("42"))])
    );

    let input = DeleteInput {
        object_type: ObjectType::KeyValuePair,
        set_input: None,
        key: vec![StoreValue::from("greeting"), StoreValue::from("absent")],
    };
    let removed = remove(&pool, &input, &connection, &options, &cancel).unwrap();
    assert!(removed.success);
    assert_eq!(removed.value, json!(1));

    assert_eq!(server.connections_accepted(), 1);
    assert_eq!(server.command_count("SET"), 4);
}

#[test]
fn set_lifecycle_over_tcp() {
    let server = FakeServer::start().expect("start server");
    let pool = ConnectionPool::tcp();
    let connection = ConnectionDescriptor::new(server.connection_string());
    let options = TaskOptions::default();
    let cancel = CancellationToken::new();

    let input = AddInput {
        input_object_type: ObjectType::Set,
        key_value_pair_input: Vec::new(),
        set_input: vec![
            SetInput {
                key: StoreValue::from("colors"),
                value: vec![StoreValue::from("red"), StoreValue::from("blue"), StoreValue::from("red")],
            },
            SetInput {
                key: StoreValue::from("colors"),
                value: vec![StoreValue::from("blue")],
            },
        ],
    };
    let results = add(&pool, &input, &connection, &options, &cancel).unwrap();
    assert!(results[0].success);
    assert_eq!(results[0].value, json!(2));
    assert!(!results[1].success);
    assert_eq!(results[1].value, json!(0));

    let input = GetInput {
        object_type: ObjectType::Set,
        key: Vec::new(),
        set_key: Some(StoreValue::from("colors")),
    };
    let output = get(&pool, &input, &connection, &options, &cancel).unwrap();
    assert_eq!(
        output,
        GetOutput::Members(vec![StoreValue::from("blue"), StoreValue::from("red")])
    );

    let input = DeleteInput {
        object_type: ObjectType::Set,
        set_input: Some(SetInput {
            key: StoreValue::from("colors"),
            value: vec![StoreValue::from("red"), StoreValue::from("green")],
        }),
        key: Vec::new(),
    };
    let removed = remove(&pool, &input, &connection, &options, &cancel).unwrap();
    assert_eq!(removed.value, json!(1));

    let input = GetInput {
        object_type: ObjectType::Set,
        key: Vec::new(),
        set_key: Some(StoreValue::from("missing")),
    };
    assert_eq!(
        get(&pool, &input, &connection, &options, &cancel).unwrap(),
        GetOutput::Members(Vec::new())
    );
}

#[test]
fn command_results_are_flattened() {
    let server = FakeServer::start().expect("start server");
    let pool = ConnectionPool::tcp();
    let connection = ConnectionDescriptor::new(server.connection_string());
    let options = TaskOptions::default();
    let cancel = CancellationToken::new();

    server.set_reply("LATENCY", b"$5\r\na\nb\nc\r\n".to_vec());
    let input = CommandInput {
        command: "LATENCY DOCTOR".to_string(),
        parameters: Vec::new(),
    };
    assert_eq!(command(&pool, &input, &connection, &options, &cancel).unwrap(), vec!["a", "b", "c"]);

    let input = CommandInput {
        command: "GET".to_string(),
        parameters: kv("nothing"),
    };
    assert!(command(&pool, &input, &connection, &options, &cancel).unwrap().is_empty());

    let input = CommandInput {
        command: "ECHO".to_string(),
        parameters: vec![StoreValue::Int32(7)],
    };
    assert_eq!(command(&pool, &input, &connection, &options, &cancel).unwrap(), vec!["7"]);

    let input = CommandInput {
        command: "NOSUCHCOMMAND".to_string(),
        parameters: Vec::new(),
    };
    assert!(command(&pool, &input, &connection, &options, &cancel).is_err());
}

#[test]
fn unpooled_tasks_open_a_connection_each() {
    let server = FakeServer::start().expect("start server");
    let pool = ConnectionPool::tcp();
    let connection = ConnectionDescriptor::new(server.connection_string()).unpooled();
    let options = TaskOptions::default();
    let cancel = CancellationToken::new();

    let input = GetInput {
        object_type: ObjectType::KeyValuePair,
        key: kv("k"),
        set_key: None,
    };
    for _ in 0..3 {
        get(&pool, &input, &connection, &options, &cancel).unwrap();
    }

    assert!(pool.is_empty());
    assert_eq!(server.connections_accepted(), 3);
    assert_eq!(pool.stats().closes, 3);
}

#[test]
fn distinct_timeouts_use_distinct_connections() {
    let server = FakeServer::start().expect("start server");
    let pool = ConnectionPool::tcp();
    let options = TaskOptions::default();
    let cancel = CancellationToken::new();
    let input = CommandInput {
        command: "PING".to_string(),
        parameters: Vec::new(),
    };

    for timeout in [5, 10, 5] {
        let connection = ConnectionDescriptor::new(server.connection_string()).with_timeout(timeout);
        assert_eq!(command(&pool, &input, &connection, &options, &cancel).unwrap(), vec!["PONG"]);
    }

    assert_eq!(pool.len(), 2);
    assert_eq!(server.connections_accepted(), 2);
    assert_eq!(pool.shutdown(), 2);
}
