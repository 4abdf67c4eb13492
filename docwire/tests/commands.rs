use bson::{Bson, doc};

use docwire::{
    command::Command,
    memory::MemoryTransport,
    prelude::*,
};

const REDUCE: &str = "function (obj, prev) { prev.total += obj.amount; }";

async fn seeded() -> MemoryTransport {
    MemoryTransport::builder()
        .collection(
            "shop.sales",
            vec![
                doc! { "_id": 1, "region": "north", "amount": 10 },
                doc! { "_id": 2, "region": "south", "amount": 5 },
            ],
        )
        .build()
        .await
        .unwrap()
}

fn connect(transport: &MemoryTransport) -> Connection<MemoryTransport> {
    Connection::new(transport.clone(), "shop").unwrap()
}

#[tokio::test]
async fn native_group_failures_are_server_errors() {
    let transport = seeded().await;
    let connection = connect(&transport);
    let sales = connection.collection("sales").unwrap();

    let err = sales
        .group(GroupSpec::new(vec!["region"], REDUCE).initial(doc! { "total": 0 }))
        .await
        .unwrap_err();

    match err {
        CommandError::Server { message, .. } => assert!(message.starts_with("group command failed: ")),
        other => panic!("expected a server error, got {:?}", other),
    }
}

#[tokio::test]
async fn native_group_returns_retval() {
    let transport = seeded().await;
    transport
        .register_command("group", |command| {
            let ns = command
                .get_document("group")
                .and_then(|group| group.get_str("ns"))
                .unwrap_or_default()
                .to_string();
            doc! { "ok": 1.0, "retval": [{ "ns": ns }] }
        })
        .await;
    let connection = connect(&transport);
    let sales = connection.collection("sales").unwrap();

    let result = sales
        .group(GroupSpec::new(vec!["region"], REDUCE))
        .await
        .unwrap();

    assert_eq!(result, Bson::Array(vec![Bson::Document(doc! { "ns": "sales" })]));
}

#[tokio::test]
async fn scripted_group_failures_are_evaluation_errors() {
    let transport = seeded().await;
    let connection = connect(&transport);
    let sales = connection.collection("sales").unwrap();

    let err = sales
        .group(GroupSpec::new(vec!["region"], REDUCE).mode(GroupMode::Scripted))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Evaluation(_)));

    let err = sales
        .group(GroupSpec::new(Script::from("function (doc) { return {}; }"), REDUCE).mode(GroupMode::Scripted))
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn scripted_group_unwraps_the_result() {
    let transport = seeded().await;
    transport
        .register_command("$eval", |command| {
            let scoped = matches!(command.get("$eval"), Some(Bson::JavaScriptCodeWithScope(_)));
            doc! { "ok": 1.0, "retval": { "result": [{ "scoped": scoped }] } }
        })
        .await;
    let connection = connect(&transport);
    let sales = connection.collection("sales").unwrap();

    let result = sales
        .group(GroupSpec::new(vec!["region"], REDUCE).mode(GroupMode::Scripted))
        .await
        .unwrap();

    assert_eq!(result, Bson::Array(vec![Bson::Document(doc! { "scoped": true })]));
}

#[tokio::test]
async fn map_reduce_defaults_to_inline_output() {
    let transport = seeded().await;
    transport
        .register_command("mapreduce", |command| {
            let inline = command.get_document("out").map(|out| out.contains_key("inline")).unwrap_or(false);
            doc! {
                "ok": 1.0,
                "timeMillis": 3,
                "counts": { "input": 2, "emit": 2, "output": 2 },
                "results": [{ "_id": "north", "value": 10, "inline": inline }],
            }
        })
        .await;
    let connection = connect(&transport);
    let sales = connection.collection("sales").unwrap();

    let output = sales
        .map_reduce(
            "function () { emit(this.region, this.amount); }",
            "function (key, values) { return Array.sum(values); }",
            MapReduceOptions::new(),
        )
        .await
        .unwrap();

    match output {
        MapReduceOutput::Inline { results, statistics } => {
            assert_eq!(results, vec![doc! { "_id": "north", "value": 10, "inline": true }]);
            assert_eq!(statistics.process_time_ms, 3);
        }
        other => panic!("expected inline output, got {:?}", other),
    }
}

#[tokio::test]
async fn map_reduce_without_a_script_engine_fails() {
    let transport = seeded().await;
    let connection = connect(&transport);
    let sales = connection.collection("sales").unwrap();

    let err = sales
        .map_reduce("function () {}", "function () {}", MapReduceOptions::new().out(MapReduceOut::Replace("totals".into())))
        .await
        .unwrap_err();

    assert!(err.is_server());
}

#[tokio::test]
async fn eval_reports_script_failures() {
    let transport = seeded().await;
    let connection = connect(&transport);

    let err = connection.eval("return 1;", vec![]).await.unwrap_err();
    assert!(matches!(err, CommandError::Evaluation(_)));

    transport
        .register_command("$eval", |command| {
            let first = command
                .get_array("args")
                .ok()
                .and_then(|args| args.first().cloned())
                .unwrap_or(Bson::Null);
            doc! { "ok": 1.0, "retval": first }
        })
        .await;
    let value = connection.eval("function (x) { return x; }", vec![Bson::Int32(7)]).await.unwrap();
    assert_eq!(value, Bson::Int32(7));
}

#[tokio::test]
async fn drop_and_drop_indexes() {
    let transport = seeded().await;
    let connection = connect(&transport);
    let sales = connection.collection("sales").unwrap();

    let dropped = sales.drop_indexes().await.unwrap();
    assert_eq!(dropped.get_str("msg").unwrap(), "non-_id indexes dropped for collection");
    assert!(sales.drop_index("_id_").await.unwrap_err().is_server());

    assert!(sales.drop().await.unwrap());
    assert!(transport.documents("shop.sales").await.is_empty());

    let err = sales.drop().await.unwrap_err();
    assert_eq!(err, CommandError::server("ns not found"));
}

#[tokio::test]
async fn rename_moves_documents_and_keeps_defaults() {
    let transport = seeded().await;
    let connection = connect(&transport);
    let sales = connection
        .collection_with("sales", CollectionOptions::new().defaults(OptionSet::new().safe(true)))
        .unwrap();

    let renamed = sales.rename("orders").await.unwrap();

    assert_eq!(renamed.name(), "orders");
    assert_eq!(renamed.defaults(), sales.defaults());
    assert_eq!(transport.documents("shop.orders").await.len(), 2);
    assert!(transport.documents("shop.sales").await.is_empty());

    let Some(Command::Admin(rename)) = transport.commands().await.pop() else {
        panic!("expected an admin command");
    };
    assert_eq!(rename.namespace.to_string(), "admin.$cmd");
    assert_eq!(rename.command, doc! { "renameCollection": "shop.sales", "to": "shop.orders" });
}

#[tokio::test]
async fn rename_rejects_bad_names_before_dispatch() {
    let transport = seeded().await;
    let connection = connect(&transport);
    let sales = connection.collection("sales").unwrap();

    let err = sales.rename("bad$name").await.unwrap_err();

    assert!(err.is_validation());
    assert!(transport.commands().await.is_empty());
}

#[tokio::test]
async fn connection_level_commands() {
    let transport = seeded().await;
    let connection = connect(&transport);

    let err = connection.command(doc! { "ping": 1 }).await.unwrap_err();
    assert!(err.is_server());

    transport
        .register_command("ping", |_| doc! { "ok": 1.0 })
        .await;
    assert_eq!(connection.command(doc! { "ping": 1 }).await.unwrap(), doc! { "ok": 1.0 });

    connection.rename_collection("sales", "archive").await.unwrap();
    assert!(connection.drop_collection("archive").await.unwrap());
    assert!(connection.collection("bad..name").is_err());
    assert!(Connection::new(transport.clone(), "bad db").is_err());
}
