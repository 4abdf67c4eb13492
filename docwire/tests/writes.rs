use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use bson::{Bson, Document, doc, oid::ObjectId};
use futures::future::join_all;

use docwire::{
    command::Command,
    memory::MemoryTransport,
    prelude::*,
};

fn connect(transport: &MemoryTransport, defaults: OptionSet) -> Connection<MemoryTransport> {
    Connection::builder(transport.clone())
        .database("app")
        .options(ConnectionOptions::new().defaults(defaults))
        .build()
        .unwrap()
}

fn verifications(commands: &[Command]) -> usize {
    commands
        .iter()
        .filter(|command| matches!(command, Command::Admin(admin) if admin.name() == Some("getlasterror")))
        .count()
}

#[derive(Debug, Default)]
struct SequentialIds {
    next: AtomicU32,
}

impl IdGenerator for SequentialIds {
    fn generate(&self) -> DocumentId {
        DocumentId::from_parts(1_300_000_000, 7, 1, self.next.fetch_add(1, Ordering::SeqCst))
    }
}

#[tokio::test]
async fn insert_writes_the_sent_id_back() {
    let transport = MemoryTransport::new();
    let connection = connect(&transport, OptionSet::new().safe(true));
    let users = connection.collection("users").unwrap();

    let mut alice = doc! { "name": "Alice" };
    let outcome = users.insert_one(&mut alice, OptionSet::new()).await.unwrap();

    assert_eq!(outcome, WriteOutcome::Acknowledged { affected: 1 });
    let stored = transport.documents("app.users").await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get("_id"), alice.get("_id"));
    assert!(alice.get_object_id("_id").is_ok());
}

#[tokio::test]
async fn collections_use_their_own_id_generator() {
    let transport = MemoryTransport::new();
    let connection = connect(&transport, OptionSet::new().safe(true));
    let users = connection
        .collection_with("users", CollectionOptions::new().id_generator(Arc::new(SequentialIds::default())))
        .unwrap();

    let mut batch = vec![doc! { "n": 1 }, doc! { "n": 2 }, doc! { "_id": "kept", "n": 3 }];
    let outcome = users.insert(&mut batch, OptionSet::new()).await.unwrap();

    assert_eq!(outcome.affected(), Some(3));
    let first = DocumentId::from(batch[0].get_object_id("_id").unwrap());
    let second = DocumentId::from(batch[1].get_object_id("_id").unwrap());
    assert_eq!((first.counter(), second.counter()), (0, 1));
    assert_eq!(first.process_group(), 7);
    assert_eq!(batch[2].get_str("_id").unwrap(), "kept");
}

#[tokio::test]
async fn forced_server_ids_are_left_to_the_server() {
    let transport = MemoryTransport::new();
    let connection = Connection::builder(transport.clone())
        .database("app")
        .options(ConnectionOptions::new().force_server_object_id(true))
        .build()
        .unwrap();

    let mut document = doc! { "a": 1 };
    connection
        .collection("things")
        .unwrap()
        .insert_one(&mut document, OptionSet::new())
        .await
        .unwrap();

    assert!(!document.contains_key("_id"));
    assert!(transport.documents("app.things").await[0].get_object_id("_id").is_ok());
}

#[tokio::test]
async fn verified_update_matching_nothing_affects_zero() {
    let transport = MemoryTransport::new();
    let connection = connect(&transport, OptionSet::new());
    let users = connection.collection("users").unwrap();

    let outcome = users
        .update(
            doc! { "name": "nobody" },
            doc! { "$set": { "seen": true } },
            UpdateOptions::new().options(OptionSet::new().safe(true)),
        )
        .await
        .unwrap();

    assert_eq!(outcome, WriteOutcome::Acknowledged { affected: 0 });
}

#[tokio::test]
async fn multi_updates_and_upserts_report_counts() {
    let transport = MemoryTransport::builder()
        .collection("app.users", vec![doc! { "_id": 1, "group": "a" }, doc! { "_id": 2, "group": "a" }])
        .build()
        .await
        .unwrap();
    let connection = connect(&transport, OptionSet::new().safe(true));
    let users = connection.collection("users").unwrap();

    let multi = users
        .update(doc! { "group": "a" }, doc! { "$inc": { "visits": 1 } }, UpdateOptions::new().multi(true))
        .await
        .unwrap();
    assert_eq!(multi.affected(), Some(2));

    let upsert = users
        .update(doc! { "_id": 3 }, doc! { "$set": { "group": "b" } }, UpdateOptions::new().upsert(true))
        .await
        .unwrap();
    assert_eq!(upsert.affected(), Some(1));
    assert_eq!(users.count(doc! {}, OptionSet::new()).await.unwrap(), 3);
}

#[tokio::test]
async fn verified_writes_surface_server_errors() {
    let transport = MemoryTransport::new();
    let connection = connect(&transport, OptionSet::new());
    let users = connection.collection("users").unwrap();

    let mut first = doc! { "_id": 1 };
    users.insert_one(&mut first, OptionSet::new().safe(true)).await.unwrap();

    let mut duplicate = doc! { "_id": 1 };
    let err = users
        .insert_one(&mut duplicate, OptionSet::new().safe(true))
        .await
        .unwrap_err();

    match err {
        CommandError::Server { message, code } => {
            assert!(message.starts_with("E11000"));
            assert_eq!(code, Some(11000));
        }
        other => panic!("expected a server error, got {:?}", other),
    }
}

#[tokio::test]
async fn unacknowledged_writes_never_report_server_errors() {
    let transport = MemoryTransport::new();
    let connection = connect(&transport, OptionSet::new());
    let users = connection.collection("users").unwrap();

    let mut first = doc! { "_id": 1 };
    let mut duplicate = doc! { "_id": 1 };
    users.insert_one(&mut first, OptionSet::new()).await.unwrap();
    let outcome = users.insert_one(&mut duplicate, OptionSet::new()).await.unwrap();

    assert_eq!(outcome, WriteOutcome::Unacknowledged);
    assert_eq!(outcome.affected(), None);
    assert_eq!(verifications(&transport.commands().await), 0);
}

#[tokio::test]
async fn transport_failures_surface_for_every_write() {
    let transport = MemoryTransport::new();
    let connection = connect(&transport, OptionSet::new());
    let users = connection.collection("users").unwrap();

    transport.fail_next("socket closed").await;
    let err = users
        .remove(doc! { "a": 1 }, OptionSet::new())
        .await
        .unwrap_err();
    assert_eq!(err, CommandError::Transport("socket closed".into()));

    transport.fail_next("socket closed").await;
    let mut document = doc! { "a": 1 };
    let err = users
        .insert_one(&mut document, OptionSet::new().safe(true))
        .await
        .unwrap_err();
    assert_eq!(err, CommandError::Transport("socket closed".into()));
}

#[tokio::test]
async fn call_options_override_collection_and_connection_defaults() {
    let transport = MemoryTransport::new();
    let connection = connect(&transport, OptionSet::new().safe(true));
    let users = connection
        .collection_with("users", CollectionOptions::new().defaults(OptionSet::new().safe(true)))
        .unwrap();
    let plain = connection.collection("plain").unwrap();

    let mut document = doc! { "a": 1 };
    let outcome = users
        .insert_one(&mut document, OptionSet::new().safe(false))
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Unacknowledged);
    assert_eq!(verifications(&transport.commands().await), 0);

    let mut document = doc! { "a": 1 };
    let outcome = plain.insert_one(&mut document, OptionSet::new()).await.unwrap();
    assert!(outcome.is_acknowledged());
    assert_eq!(verifications(&transport.commands().await), 1);
}

#[tokio::test]
async fn write_concern_fields_reach_the_verification() {
    let transport = MemoryTransport::new();
    let connection = connect(&transport, OptionSet::new());
    let users = connection.collection("users").unwrap();

    let mut document = doc! { "a": 1 };
    users
        .insert_one(
            &mut document,
            OptionSet::new().write_concern(WriteConcernSpec::new().journal(true).wtimeout(500)),
        )
        .await
        .unwrap();

    let commands = transport.commands().await;
    let Some(Command::Admin(verification)) = commands.last() else {
        panic!("expected a verification command");
    };
    assert_eq!(verification.name(), Some("getlasterror"));
    assert_eq!(verification.command.get("j"), Some(&Bson::Boolean(true)));
    assert_eq!(verification.namespace.to_string(), "app.$cmd");
}

#[tokio::test]
async fn save_inserts_then_upserts_by_id() {
    let transport = MemoryTransport::new();
    let connection = connect(&transport, OptionSet::new().safe(true));
    let users = connection.collection("users").unwrap();

    let mut alice = doc! { "name": "Alice" };
    users.save(&mut alice, OptionSet::new()).await.unwrap();
    let id = alice.get_object_id("_id").unwrap();

    alice.insert("age", 30);
    let outcome = users.save(&mut alice, OptionSet::new()).await.unwrap();

    assert_eq!(outcome.affected(), Some(1));
    assert_eq!(
        transport.documents("app.users").await,
        vec![doc! { "_id": id, "name": "Alice", "age": 30 }],
    );
}

#[tokio::test]
async fn remove_all_empties_the_collection() {
    let transport = MemoryTransport::builder()
        .collection("app.users", (0..4).map(|n| doc! { "_id": n }).collect())
        .build()
        .await
        .unwrap();
    let connection = connect(&transport, OptionSet::new().safe(true));
    let users = connection.collection("users").unwrap();

    let outcome = users.remove(Selector::all(), OptionSet::new()).await.unwrap();

    assert_eq!(outcome.affected(), Some(4));
    assert!(transport.documents("app.users").await.is_empty());
}

#[tokio::test]
async fn concurrent_verified_writes_report_their_own_counts() {
    let seed: Vec<Document> = (0..16).map(|n| doc! { "_id": n, "hits": 0 }).collect();
    let transport = MemoryTransport::builder()
        .collection("app.counters", seed)
        .build()
        .await
        .unwrap();
    let connection = connect(&transport, OptionSet::new().safe(true));
    let counters = connection.collection("counters").unwrap();

    let updates = (0..16).map(|n| {
        let counters = &counters;
        async move {
            counters
                .update(doc! { "_id": n }, doc! { "$inc": { "hits": 1 } }, UpdateOptions::new())
                .await
        }
    });
    let misses = (100..116).map(|n| {
        let counters = &counters;
        async move {
            counters
                .update(doc! { "_id": n }, doc! { "$inc": { "hits": 1 } }, UpdateOptions::new())
                .await
        }
    });

    let (hits, misses) = futures::join!(join_all(updates), join_all(misses));

    assert!(hits.iter().all(|outcome| outcome.as_ref().unwrap().affected() == Some(1)));
    assert!(misses.iter().all(|outcome| outcome.as_ref().unwrap().affected() == Some(0)));
    assert!(transport
        .documents("app.counters")
        .await
        .iter()
        .all(|counter| counter.get_i32("hits").unwrap() == 1));
}

#[tokio::test]
async fn server_assigned_ids_are_object_ids() {
    let transport = MemoryTransport::new();
    let connection = Connection::builder(transport.clone())
        .database("app")
        .options(ConnectionOptions::new().force_server_object_id(true))
        .build()
        .unwrap();

    let mut batch = vec![doc! { "a": 1 }, doc! { "a": 2 }];
    connection
        .collection("things")
        .unwrap()
        .insert(&mut batch, OptionSet::new())
        .await
        .unwrap();

    let ids: Vec<ObjectId> = transport
        .documents("app.things")
        .await
        .iter()
        .map(|document| document.get_object_id("_id").unwrap())
        .collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}
