use std::sync::mpsc;

use bson::{Bson, Document, doc};

use docwire::{
    args::FindArg,
    command::Command,
    document::Body,
    memory::MemoryTransport,
    prelude::*,
    query::QueryCommand,
};

async fn seeded() -> MemoryTransport {
    MemoryTransport::builder()
        .collection(
            "app.people",
            vec![
                doc! { "_id": 1, "name": "Ada", "age": 36, "tags": ["math", "code"] },
                doc! { "_id": 2, "name": "Grace", "age": 45, "tags": ["code"] },
                doc! { "_id": 3, "name": "Alan", "age": 41, "tags": ["math"] },
                doc! { "_id": 4, "name": "Edsger", "age": 72 },
            ],
        )
        .build()
        .await
        .unwrap()
}

fn connect(transport: &MemoryTransport) -> Connection<MemoryTransport> {
    Connection::new(transport.clone(), "app").unwrap()
}

#[tokio::test]
async fn find_sorts_skips_limits_and_projects() {
    let transport = seeded().await;
    let connection = connect(&transport);
    let people = connection.collection("people").unwrap();

    let options = FindOptions::builder()
        .sort(SortSpec::by("age", SortDirection::Desc))
        .skip(1)
        .limit(2)
        .fields(vec!["name"])
        .build();
    let found = people
        .find_documents(doc! { "age": { "$gte": 36 } }, options)
        .await
        .unwrap();

    assert_eq!(found, vec![doc! { "_id": 2, "name": "Grace" }, doc! { "_id": 3, "name": "Alan" }]);
}

#[tokio::test]
async fn find_one_limits_to_a_single_document() {
    let transport = seeded().await;
    let connection = connect(&transport);
    let people = connection.collection("people").unwrap();

    let found = people
        .find_one(doc! { "tags": "code" }, FindOptions::default())
        .await
        .unwrap();
    assert_eq!(found.unwrap().get_str("name").unwrap(), "Ada");

    let Some(Command::Query(query)) = transport.commands().await.pop() else {
        panic!("expected a query");
    };
    assert_eq!(query.limit, 1);

    let missing = people
        .find_one(doc! { "name": "Barbara" }, FindOptions::default())
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn find_by_identifier() {
    let transport = MemoryTransport::new();
    let connection = connect(&transport);
    let people = connection.collection("people").unwrap();

    let mut document = doc! { "name": "Barbara" };
    people.insert_one(&mut document, OptionSet::new().safe(true)).await.unwrap();
    let id = DocumentId::from(document.get_object_id("_id").unwrap());

    let found = people.find_one(id, FindOptions::default()).await.unwrap();
    assert_eq!(found, Some(document));
}

#[tokio::test]
async fn server_query_errors_are_reported() {
    let transport = seeded().await;
    let connection = connect(&transport);
    let people = connection.collection("people").unwrap();

    let err = people
        .find_documents(doc! { "age": { "$mod": [2, 0] } }, FindOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_server());
}

#[tokio::test]
async fn legacy_find_shapes() {
    let transport = seeded().await;
    let connection = connect(&transport);
    let people = connection.collection("people").unwrap();

    let query = people
        .find_compat(vec![FindArg::from(doc! { "age": 36 }), FindArg::from(vec!["name"])])
        .unwrap()
        .unwrap();
    assert_eq!(query.selector, Body::Document(doc! { "age": 36 }));
    assert_eq!(query.projection, Some(Body::Document(doc! { "name": 1 })));

    let query = people
        .find_compat(vec![
            FindArg::from(doc! {}),
            FindArg::Null,
            FindArg::from(5_i64),
            FindArg::from(10_i64),
            FindArg::from(false),
        ])
        .unwrap()
        .unwrap();
    assert_eq!((query.skip, query.limit), (5, 10));
    assert!(query.flags.no_cursor_timeout);

    let query = people
        .find_compat(vec![FindArg::from(doc! {}), FindArg::from(doc! { "limit": 3, "sort": "name" })])
        .unwrap()
        .unwrap();
    assert_eq!(query.limit, 3);
    assert_eq!(
        query.selector,
        Body::Document(doc! { "$query": {}, "$orderby": { "name": 1 } }),
    );

    let err = people
        .find_compat(vec![FindArg::from(true), FindArg::from(true)])
        .unwrap()
        .unwrap_err();
    assert!(err.is_validation());

    let documents = people.fetch(people.find(doc! {}, FindOptions::default()).unwrap()).await.unwrap();
    assert_eq!(documents.len(), 4);
}

#[tokio::test]
async fn legacy_find_delivers_to_the_handler() {
    let transport = seeded().await;
    let connection = connect(&transport);
    let people = connection.collection("people").unwrap();

    let (sender, receiver) = mpsc::channel::<CommandResult<QueryCommand>>();
    let returned = people.find_compat(vec![
        FindArg::from(doc! { "name": "Ada" }),
        FindArg::handler(move |result| sender.send(result).unwrap()),
    ]);
    assert!(returned.is_none());
    assert_eq!(
        receiver.recv().unwrap().unwrap().selector,
        Body::Document(doc! { "name": "Ada" }),
    );

    let (sender, receiver) = mpsc::channel::<CommandResult<QueryCommand>>();
    people.find_compat(vec![
        FindArg::handler(move |result| sender.send(result).unwrap()),
        FindArg::Int(1),
        FindArg::Int(2),
        FindArg::Int(3),
        FindArg::Int(4),
        FindArg::Int(5),
        FindArg::Int(6),
    ]);
    assert!(receiver.recv().unwrap().unwrap_err().is_validation());
}

#[tokio::test]
async fn legacy_find_one_with_leading_handler_takes_options() {
    let transport = seeded().await;
    let connection = connect(&transport);
    let people = connection.collection("people").unwrap();

    let (sender, receiver) = mpsc::channel::<CommandResult<Option<Document>>>();
    let returned = people
        .find_one_compat(vec![
            FindArg::handler(move |result| sender.send(result).unwrap()),
            FindArg::from(doc! { "sort": { "age": -1 } }),
        ])
        .await;

    assert!(returned.is_none());
    let oldest = receiver.recv().unwrap().unwrap().unwrap();
    assert_eq!(oldest.get_str("name").unwrap(), "Edsger");
}

#[tokio::test]
async fn find_and_modify_returns_original_or_new() {
    let transport = seeded().await;
    let connection = connect(&transport);
    let people = connection.collection("people").unwrap();

    let original = people
        .find_and_modify(doc! { "_id": 1 }, Some(doc! { "$inc": { "age": 1 } }), FindAndModifyOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(original.get_i32("age").unwrap(), 36);

    let updated = people
        .find_and_modify(
            doc! { "tags": "code" },
            Some(doc! { "$set": { "senior": true } }),
            FindAndModifyOptions::new()
                .sort(SortSpec::by("age", SortDirection::Desc))
                .return_new(true)
                .fields(vec!["name", "senior"]),
        )
        .await
        .unwrap();
    assert_eq!(updated, Some(doc! { "_id": 2, "name": "Grace", "senior": true }));
}

#[tokio::test]
async fn find_and_modify_without_a_match_is_none() {
    let transport = seeded().await;
    let connection = connect(&transport);
    let people = connection.collection("people").unwrap();

    let verified = FindAndModifyOptions::new().options(OptionSet::new().safe(true));
    let result = people
        .find_and_modify(doc! { "name": "nobody" }, Some(doc! { "$set": { "x": 1 } }), verified)
        .await
        .unwrap();
    assert_eq!(result, None);

    let upserted = people
        .find_and_modify(
            doc! { "name": "Barbara" },
            Some(doc! { "$set": { "age": 90 } }),
            FindAndModifyOptions::new().upsert(true).return_new(true),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(upserted.get_str("name").unwrap(), "Barbara");
    assert_eq!(upserted.get_i32("age").unwrap(), 90);
}

#[tokio::test]
async fn find_and_remove_deletes_the_document() {
    let transport = seeded().await;
    let connection = connect(&transport);
    let people = connection.collection("people").unwrap();

    let removed = people
        .find_and_remove(doc! { "name": "Alan" }, FindAndModifyOptions::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(removed.get_i32("_id").unwrap(), 3);
    assert_eq!(people.count(doc! {}, OptionSet::new()).await.unwrap(), 3);
}

#[tokio::test]
async fn count_and_distinct() {
    let transport = seeded().await;
    let connection = connect(&transport);
    let people = connection.collection("people").unwrap();

    let over_forty = people
        .count(doc! { "age": { "$gt": 40 } }, OptionSet::new())
        .await
        .unwrap();
    assert_eq!(over_forty, 3);

    let tags = people.distinct("tags", doc! {}, OptionSet::new()).await.unwrap();
    assert_eq!(tags, vec![Bson::from("math"), Bson::from("code")]);

    let empty = connection.collection("nothing").unwrap();
    assert_eq!(empty.count(doc! {}, OptionSet::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn read_preference_sets_slave_ok() {
    let transport = seeded().await;
    let connection = connect(&transport);
    let people = connection.collection("people").unwrap();

    let query = people
        .find(doc! {}, FindOptions::builder().read("secondary").build())
        .unwrap();
    assert!(query.flags.slave_ok);

    let query = people
        .find(doc! {}, FindOptions::builder().read("primary").build())
        .unwrap();
    assert!(!query.flags.slave_ok);
}
