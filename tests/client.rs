//! End-to-end tests through the client facade

use meridian::crates::cluster::testing::{single_owner_cluster, MemoryServer, MockNode};
use meridian::{
    AbortStatus, Bin, Client, ClientConfig, CommitStatus, Error, Key, ResultCode, TxnState, Value,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn client_with(config: ClientConfig) -> (Client, Arc<MemoryServer>, Arc<MockNode>) {
    init_tracing();
    let server = MemoryServer::new();
    let node = Arc::new(MockNode::serving("A", server.clone()));
    let cluster = single_owner_cluster("test", node.clone(), &[]);
    let client = Client::new(Arc::new(cluster), config).unwrap();
    (client, server, node)
}

fn client() -> (Client, Arc<MemoryServer>, Arc<MockNode>) {
    client_with(ClientConfig::default())
}

fn key(i: i64) -> Key {
    Key::new("test", "users", i).unwrap()
}

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    name: String,
    age: i64,
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(meridian::CONFIG_FILE_NAME);
    let mut config = ClientConfig::default();
    config.replica = "prefer_rack".into();
    config.rack_ids = vec![2, 3];
    config.batch.concurrent_nodes = 0;
    config.write_to_file(&path).unwrap();

    let loaded = ClientConfig::from_file(&path).unwrap();
    assert_eq!(loaded, config);

    let (client, _, _) = client_with(loaded);
    assert_eq!(client.batch_policy().concurrent_nodes, 0);
    assert_eq!(client.write_policy().base.max_retries, 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let server = MemoryServer::new();
    let node = Arc::new(MockNode::serving("A", server));
    let cluster = single_owner_cluster("test", node, &[]);
    let config = ClientConfig {
        replica: "closest".into(),
        ..ClientConfig::default()
    };
    let err = Client::new(Arc::new(cluster), config).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

// ============================================================================
// Single key
// ============================================================================

#[test]
fn test_put_get_delete() {
    let (client, _, _) = client();
    let k = key(1);
    assert_eq!(client.get(&k).unwrap(), None);
    assert!(!client.exists(&k).unwrap());

    client.put(&k, &[Bin::new("name", "ann"), Bin::new("age", 30i64)]).unwrap();
    client.add(&k, &[Bin::new("age", 1i64)]).unwrap();
    client.append(&k, &[Bin::new("name", "e")]).unwrap();

    let record = client.get(&k).unwrap().unwrap();
    assert_eq!(record.get("name"), Some(&Value::from("anne")));
    assert_eq!(record.get("age"), Some(&Value::Int(31)));
    let header = client.get_header(&k).unwrap().unwrap();
    assert!(header.bins.is_empty());

    assert!(client.delete(&k).unwrap());
    assert!(!client.delete(&k).unwrap());
}

#[test]
fn test_get_object_decodes_record() {
    let (client, server, _) = client();
    let client = client.with_serde_decoder::<User>();
    server.insert(
        &key(7),
        HashMap::from([
            ("name".to_string(), Value::from("bo")),
            ("age".to_string(), Value::Int(40)),
        ]),
    );

    let user: User = client.get_object(&key(7)).unwrap().unwrap();
    assert_eq!(user, User { name: "bo".into(), age: 40 });
    assert_eq!(client.get_object::<User>(&key(8)).unwrap(), None);

    let err = client.get_object::<String>(&key(7)).unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
}

#[test]
fn test_get_object_without_decoder() {
    let (client, _, _) = client();
    let err = client.get_object::<User>(&key(1)).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

// ============================================================================
// Batch
// ============================================================================

#[test]
fn test_batch_through_client() {
    let (client, server, _) = client();
    let keys: Vec<Key> = (0..5).map(key).collect();
    for k in &keys[..3] {
        server.insert(k, HashMap::from([("a".to_string(), Value::Int(1))]));
    }

    let exists: Vec<bool> = client
        .batch_exists(&keys)
        .unwrap()
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(exists, vec![true, true, true, false, false]);

    let deleted = client.batch_delete(&keys).unwrap();
    assert!(!deleted.status);
    let codes: Vec<ResultCode> = deleted.records.iter().map(|r| r.result_code).collect();
    assert_eq!(&codes[..3], &[ResultCode::OK; 3]);
    assert_eq!(&codes[3..], &[ResultCode::KEY_NOT_FOUND; 2]);
    assert!(server.is_empty());
}

// ============================================================================
// Transactions
// ============================================================================

#[test]
fn test_transaction_commit_through_client() {
    let (client, server, _) = client();
    server.insert(&key(1), HashMap::from([("a".to_string(), Value::Int(1))]));
    let txn = client.new_txn();
    let t = client.with_txn(&txn);

    assert!(t.get(&key(1)).unwrap().is_some());
    t.put(&key(2), &[Bin::new("a", 2i64)]).unwrap();
    assert_eq!(txn.read_count(), 1);
    assert_eq!(txn.write_count(), 1);

    let outcome = client.commit(&txn).unwrap();
    assert_eq!(outcome.status, CommitStatus::Ok);
    assert_eq!(outcome.verify_records.len(), 1);
    assert_eq!(outcome.roll_records.len(), 1);
    assert_eq!(outcome.in_doubt().count(), 0);
    assert_eq!(txn.state(), TxnState::Committed);
    assert_eq!(server.pending_undo(txn.id()), 0);
    assert_eq!(client.get(&key(2)).unwrap().unwrap().get("a"), Some(&Value::Int(2)));

    let err = t.put(&key(3), &[Bin::new("a", 3i64)]).unwrap_err();
    assert!(matches!(err, Error::TxnClosed { .. }));
}

#[test]
fn test_transaction_abort_through_client() {
    let (client, server, _) = client();
    server.insert(&key(1), HashMap::from([("a".to_string(), Value::Int(1))]));
    let txn = client.new_txn();
    let t = client.with_txn(&txn);
    t.put(&key(1), &[Bin::new("a", 10i64)]).unwrap();

    let outcome = client.abort(&txn).unwrap();
    assert_eq!(outcome.status, AbortStatus::Ok);
    assert_eq!(outcome.roll_records[0].key, key(1));
    assert_eq!(client.get(&key(1)).unwrap().unwrap().get("a"), Some(&Value::Int(1)));
    assert_eq!(txn.state(), TxnState::Aborted);
}
